use crate::database::{Database, connect_db_optional_ks, parse_database_urls};
use anyhow::{Result, anyhow};
use include_dir::{Dir, include_dir};
use rand::{Rng, rng};
use std::env;

static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const DEFAULT_TEST_NODE_URLS: &str = "127.0.0.1:9042";

pub fn get_migrations() -> Vec<(String, String)> {
    let mut migrations: Vec<_> = MIGRATIONS_DIR
        .files()
        .map(|file| {
            (
                file.path().to_str().expect("valid utf8").to_string(),
                file.contents_utf8().expect("valid utf8").to_string(),
            )
        })
        .collect();

    migrations.sort();
    migrations
}

/// Creates a throwaway keyspace with every migration applied.
///
/// Returns the session bound to it and the keyspace name. Needs a reachable
/// Scylla/Cassandra node, taken from `DATABASE_NODE_URLS` when set.
pub async fn create_test_database() -> Result<(Database, String)> {
    let keyspace_name = format!("test_ks_{}", rng().random::<u32>());

    let node_urls =
        env::var("DATABASE_NODE_URLS").unwrap_or_else(|_| DEFAULT_TEST_NODE_URLS.to_string());
    let database_urls = parse_database_urls(&node_urls);
    let session = connect_db_optional_ks(&database_urls, None).await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace_name
            ),
            &[],
        )
        .await?;

    session.use_keyspace(&keyspace_name, true).await?;

    for (file, content) in get_migrations() {
        for statement in content.split(';').filter(|s| !s.trim().is_empty()) {
            session
                .query_unpaged(statement.trim(), &[])
                .await
                .map_err(|e| anyhow!("Migration failed for file {}: {}", file, e))?;
        }
    }

    Ok((session, keyspace_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded_in_order() {
        let migrations = get_migrations();

        assert!(!migrations.is_empty());
        assert!(
            migrations
                .windows(2)
                .all(|pair| pair[0].0 <= pair[1].0)
        );
        assert!(
            migrations
                .iter()
                .any(|(_, content)| content.contains("token_slots"))
        );
    }

    #[tokio::test]
    #[ignore]
    async fn cleanup_test_keyspaces() -> Result<()> {
        let node_urls =
            env::var("DATABASE_NODE_URLS").unwrap_or_else(|_| DEFAULT_TEST_NODE_URLS.to_string());
        let database_urls = parse_database_urls(&node_urls);
        let session = connect_db_optional_ks(&database_urls, None).await?;

        let rows = session
            .query_unpaged("SELECT keyspace_name FROM system_schema.keyspaces", &[])
            .await?
            .into_rows_result()?;

        for row in rows.rows::<(String,)>()? {
            let (keyspace_name,) = row?;
            if keyspace_name.starts_with("test_") {
                println!("Dropping keyspace: {}", keyspace_name);
                session
                    .query_unpaged(format!("DROP KEYSPACE IF EXISTS {}", keyspace_name), &[])
                    .await?;
            }
        }

        println!("Cleanup complete");
        Ok(())
    }
}

use crate::database::Database;
use crate::database::preparer::CachedPreparedStatement;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

/// Source of truth for which instances of a rack are still running.
pub trait MembershipOracle {
    fn live_instance_ids(&self, rack: &str)
    -> impl Future<Output = Result<HashSet<String>>> + Send;
}

/// Returns the bucket's number (UTC minute)
fn get_time_bucket_minutes(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp() / 60
}

static INSERT_HEARTBEAT_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO instance_heartbeats (app_name,
                                     rack,
                                     time_bucket_minutes,
                                     timestamp,
                                     instance_id)
    VALUES (?, ?, ?, ?, ?)
    ",
);

async fn insert_heartbeat(
    session: &Database,
    app_name: &str,
    rack: &str,
    instance_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    let time_bucket = get_time_bucket_minutes(timestamp);

    INSERT_HEARTBEAT_QUERY
        .execute_unpaged(
            session,
            (app_name, rack, time_bucket, timestamp, instance_id),
        )
        .await?;

    Ok(())
}

static GET_LIVE_INSTANCES_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT instance_id
    FROM instance_heartbeats
    WHERE app_name = ?
      AND rack = ?
      AND time_bucket_minutes = ?
      AND timestamp >= ?
    ",
);

async fn get_live_instances(
    session: &Database,
    app_name: &str,
    rack: &str,
    within_duration: Duration,
) -> Result<HashSet<String>> {
    let now = Utc::now();
    let cutoff = now - within_duration;
    let current_bucket = get_time_bucket_minutes(now);
    let cutoff_bucket = get_time_bucket_minutes(cutoff);

    let mut live = HashSet::new();

    // Query all buckets from cutoff_bucket to current_bucket (inclusive)
    for bucket in cutoff_bucket..=current_bucket {
        let rows = GET_LIVE_INSTANCES_QUERY
            .execute_unpaged(session, (app_name, rack, bucket, cutoff))
            .await?
            .into_rows_result()?;

        for row in rows.rows::<(String,)>()? {
            let (instance_id,) = row?;
            live.insert(instance_id);
        }
    }

    Ok(live)
}

/// Publishes this instance's heartbeat and answers membership questions from
/// everybody's heartbeats.
///
/// An instance counts as running while it has a heartbeat younger than two intervals.
pub struct HeartbeatManager {
    app_name: String,
    rack: String,
    instance_id: String,
    interval: Duration,
    session: Arc<Database>,
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HeartbeatManager {
    pub async fn new(
        app_name: String,
        rack: String,
        instance_id: String,
        interval: Duration,
        session: Arc<Database>,
    ) -> Result<Self> {
        INSERT_HEARTBEAT_QUERY
            .optimistically_prepare(&session)
            .await?;
        GET_LIVE_INSTANCES_QUERY
            .optimistically_prepare(&session)
            .await?;

        Ok(Self {
            app_name,
            rack,
            instance_id,
            interval,
            session,
            task_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Publishes a first heartbeat before returning, then keeps beating in the background.
    ///
    /// Must run before the node claims a slot, otherwise another booting node sees
    /// the fresh slot with no running instance behind it.
    pub async fn start(&self) {
        let mut handle = self.task_handle.lock().await;

        if handle.is_some() {
            return;
        }

        let app_name = self.app_name.clone();
        let rack = self.rack.clone();
        let instance_id = self.instance_id.clone();
        let interval = self.interval;
        let session = self.session.clone();

        if let Err(e) =
            insert_heartbeat(&session, &app_name, &rack, &instance_id, Utc::now()).await
        {
            error!("failed to send first heartbeat: {e}");
        }

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;

                let result =
                    insert_heartbeat(&session, &app_name, &rack, &instance_id, Utc::now()).await;

                if let Err(e) = result {
                    error!("failed to send heartbeat: {e}");
                }
            }
        });

        *handle = Some(task);

        info!("HeartbeatManager started for {}", self.instance_id)
    }

    pub async fn stop(&self) {
        let mut handle = self.task_handle.lock().await;

        if let Some(task) = handle.take() {
            task.abort();
            info!("HeartbeatManager stopped")
        }
    }
}

impl MembershipOracle for HeartbeatManager {
    async fn live_instance_ids(&self, rack: &str) -> Result<HashSet<String>> {
        get_live_instances(&self.session, &self.app_name, rack, self.interval * 2).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::create_test_database;

    #[test]
    fn test_get_time_bucket() {
        let timestamp1 = DateTime::parse_from_rfc3339("2024-01-15T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);

        let timestamp2 = DateTime::parse_from_rfc3339("2024-01-15T12:30:01Z")
            .unwrap()
            .with_timezone(&Utc);

        let timestamp3 = DateTime::parse_from_rfc3339("2024-01-15T12:31:45Z")
            .unwrap()
            .with_timezone(&Utc);

        let bucket1 = get_time_bucket_minutes(timestamp1);
        let bucket2 = get_time_bucket_minutes(timestamp2);
        let bucket3 = get_time_bucket_minutes(timestamp3);

        assert_eq!(bucket1, bucket2);
        assert_ne!(bucket1, bucket3);
    }

    #[tokio::test]
    #[ignore = "requires a running Scylla node"]
    async fn test_insert_and_get_live_instances() -> Result<()> {
        let (session, _) = create_test_database().await?;

        let app = "test_cluster";

        insert_heartbeat(&session, app, "rack-a", "i-fresh", Utc::now()).await?;
        insert_heartbeat(
            &session,
            app,
            "rack-a",
            "i-recent",
            Utc::now() - Duration::from_secs(240),
        )
        .await?;
        insert_heartbeat(
            &session,
            app,
            "rack-a",
            "i-stale",
            Utc::now() - Duration::from_secs(310),
        )
        .await?;
        insert_heartbeat(&session, app, "rack-b", "i-other-rack", Utc::now()).await?;
        insert_heartbeat(&session, "other_cluster", "rack-a", "i-other-app", Utc::now()).await?;

        let live = get_live_instances(&session, app, "rack-a", Duration::from_secs(300)).await?;

        assert!(live.contains("i-fresh"));
        assert!(live.contains("i-recent"));
        assert!(!live.contains("i-stale"));
        assert!(!live.contains("i-other-rack"));
        assert!(!live.contains("i-other-app"));

        Ok(())
    }
}

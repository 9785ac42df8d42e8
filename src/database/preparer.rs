use super::Database;
use anyhow::{Context, Result};
use log::info;
use scylla::{
    response::query_result::QueryResult, statement::prepared::PreparedStatement, value::Row,
};
use tokio::sync::Mutex;

/// A CQL statement prepared on first use and reused afterwards.
pub struct CachedPreparedStatement {
    statement: &'static str,
    // Mutex so a static instance can fill its cache lazily
    prepared: Mutex<Option<PreparedStatement>>,
}

impl CachedPreparedStatement {
    pub const fn new(statement: &'static str) -> Self {
        Self {
            statement,
            prepared: Mutex::const_new(None),
        }
    }

    pub async fn get_prepared_statement(&self, db: &Database) -> Result<PreparedStatement> {
        let mut lock = self.prepared.lock().await;

        // Statements are static and shared by tests that each run on their own keyspace.
        #[cfg(not(test))]
        if let Some(prepared) = &*lock {
            return Ok(prepared.clone());
        }

        info!("Preparing statement: {}", self.statement.replace('\n', " "));
        let prepared = db.prepare(self.statement).await?;
        *lock = Some(prepared.clone());

        Ok(prepared)
    }

    pub async fn optimistically_prepare(&self, db: &Database) -> Result<()> {
        self.get_prepared_statement(db).await?;
        Ok(())
    }

    /// A thin wrapper around [`Session::execute_unpaged`].
    ///
    /// Please refer to that function's documentation for details on arguments
    /// and behavior.
    ///
    /// [`Session::execute_unpaged`]: scylla::client::session::Session::execute_unpaged
    pub async fn execute_unpaged(
        &self,
        db: &Database,
        values: impl scylla::serialize::row::SerializeRow,
    ) -> Result<QueryResult> {
        let prepared = self.get_prepared_statement(db).await?;

        db.execute_unpaged(&prepared, &values)
            .await
            .map_err(Into::into)
    }

    /// Executes a lightweight transaction (`IF <condition>` / `IF NOT EXISTS`) and
    /// returns its `[applied]` flag.
    ///
    /// When the condition fails Scylla also sends back the conflicting row, so
    /// the result is read untyped and only the first column is inspected.
    pub async fn execute_conditional(
        &self,
        db: &Database,
        values: impl scylla::serialize::row::SerializeRow,
    ) -> Result<bool> {
        let rows = self
            .execute_unpaged(db, values)
            .await?
            .into_rows_result()
            .context("conditional statement returned no rows")?;

        let row: Row = rows.first_row()?;

        row.columns
            .first()
            .and_then(|column| column.as_ref())
            .and_then(|value| value.as_boolean())
            .context("missing [applied] column")
    }
}

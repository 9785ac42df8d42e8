use crate::database::Database;
use crate::database::preparer::CachedPreparedStatement;
use crate::identity::slot::Slot;
use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::error;
use scylla::response::query_result::QueryRowsResult;
use std::sync::Arc;

/// Durable directory of slots, partitioned by app name.
pub trait SlotRegistry {
    /// All slots of `app_name`, in the registry's stable listing order.
    fn list_slots(&self, app_name: &str) -> impl Future<Output = Result<Vec<Slot>>> + Send;

    /// Removes `slot` if the registry still holds it for the same instance.
    /// Returns `false` when it was already gone or re-issued to another instance.
    fn delete_slot(&self, slot: &Slot) -> impl Future<Output = Result<bool>> + Send;

    /// Registers `slot`. Returns `false` when its id is already taken.
    fn insert_slot(&self, slot: &Slot) -> impl Future<Output = Result<bool>> + Send;
}

static LIST_SLOTS_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    SELECT id,
           instance_id,
           hostname,
           host_ip,
           rack,
           region,
           token,
           updated_at
    FROM token_slots
    WHERE app_name = ?
    ",
);

static DELETE_SLOT_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    DELETE FROM token_slots
    WHERE app_name = ?
      AND id = ?
    IF instance_id = ?
    ",
);

static INSERT_SLOT_QUERY: CachedPreparedStatement = CachedPreparedStatement::new(
    "
    INSERT INTO token_slots (app_name,
                             id,
                             instance_id,
                             hostname,
                             host_ip,
                             rack,
                             region,
                             token,
                             updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    IF NOT EXISTS
    ",
);

fn parse_slot_rows(app_name: &str, result: QueryRowsResult) -> Result<Vec<Slot>> {
    let rows = result.rows::<(
        i64,
        String,
        String,
        String,
        String,
        String,
        String,
        DateTime<Utc>,
    )>()?;

    let maybe_slots: Vec<Result<_>> = rows
        .into_iter()
        .map(|row| {
            let (id, instance_id, hostname, host_ip, rack, region, token, updated_at) = row?;

            Ok(Slot {
                id,
                app_name: app_name.to_string(),
                instance_id,
                hostname,
                host_ip: host_ip.parse()?,
                rack,
                region,
                token,
                updated_at,
            })
        })
        .collect();

    let (slots, errors): (Vec<_>, Vec<_>) = maybe_slots.into_iter().partition_result();

    if !errors.is_empty() {
        error!(
            "Failed to parse [{}] slots of '{}'. First 3 errors: {}",
            errors.len(),
            app_name,
            errors
                .iter()
                .take(3)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(slots)
}

/// [`SlotRegistry`] stored in the `token_slots` table.
///
/// Rows are clustered by id, which fixes the listing order. Deletes and inserts
/// are lightweight transactions: a delete only applies to the instance it was
/// listed for, so a stale listing can't remove a slot another node just claimed.
pub struct ScyllaSlotRegistry {
    session: Arc<Database>,
}

impl ScyllaSlotRegistry {
    pub async fn new(session: Arc<Database>) -> Result<Self> {
        LIST_SLOTS_QUERY.optimistically_prepare(&session).await?;
        DELETE_SLOT_QUERY.optimistically_prepare(&session).await?;
        INSERT_SLOT_QUERY.optimistically_prepare(&session).await?;

        Ok(Self { session })
    }
}

impl SlotRegistry for ScyllaSlotRegistry {
    async fn list_slots(&self, app_name: &str) -> Result<Vec<Slot>> {
        let rows = LIST_SLOTS_QUERY
            .execute_unpaged(&self.session, (app_name,))
            .await?
            .into_rows_result()?;

        parse_slot_rows(app_name, rows)
    }

    async fn delete_slot(&self, slot: &Slot) -> Result<bool> {
        DELETE_SLOT_QUERY
            .execute_conditional(
                &self.session,
                (&slot.app_name, slot.id, &slot.instance_id),
            )
            .await
    }

    async fn insert_slot(&self, slot: &Slot) -> Result<bool> {
        INSERT_SLOT_QUERY
            .execute_conditional(
                &self.session,
                (
                    &slot.app_name,
                    slot.id,
                    &slot.instance_id,
                    &slot.hostname,
                    slot.host_ip.to_string(),
                    &slot.rack,
                    &slot.region,
                    &slot.token,
                    slot.updated_at,
                ),
            )
            .await
    }
}

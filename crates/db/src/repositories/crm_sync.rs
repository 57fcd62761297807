use sqlx::{sqlite::SqliteRow, Row};

use leadbot_core::domain::conversation::UserId;
use leadbot_core::domain::crm::{CrmSyncEvent, CrmSyncStatus};

use super::conversation::{format_timestamp, parse_timestamp, to_i64};
use super::{CrmSyncLogRepository, RepositoryError};
use crate::DbPool;

/// Append-only log of CRM delivery attempts.
pub struct SqlCrmSyncLogRepository {
    pool: DbPool,
}

impl SqlCrmSyncLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CrmSyncLogRepository for SqlCrmSyncLogRepository {
    async fn append(&self, event: CrmSyncEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO crm_sync_event (
                id,
                user_id,
                conversation_version,
                attempt,
                status,
                crm_object_id,
                error_message,
                payload_json,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.user_id.0)
        .bind(to_i64("conversation_version", event.conversation_version)?)
        .bind(i64::from(event.attempt))
        .bind(event.status.as_str())
        .bind(&event.crm_object_id)
        .bind(&event.error_message)
        .bind(&event.payload_json)
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<CrmSyncEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                conversation_version,
                attempt,
                status,
                crm_object_id,
                error_message,
                payload_json,
                occurred_at
             FROM crm_sync_event
             WHERE user_id = ?
             ORDER BY occurred_at ASC, attempt ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<CrmSyncEvent, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CrmSyncStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sync status `{status_raw}`")))?;

    let version = row.try_get::<i64, _>("conversation_version")?;
    let attempt = row.try_get::<i64, _>("attempt")?;

    Ok(CrmSyncEvent {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        conversation_version: u64::try_from(version).map_err(|_| {
            RepositoryError::Decode(format!("invalid conversation_version: {version}"))
        })?,
        attempt: u32::try_from(attempt)
            .map_err(|_| RepositoryError::Decode(format!("invalid attempt: {attempt}")))?,
        status,
        crm_object_id: row.try_get("crm_object_id")?,
        error_message: row.try_get("error_message")?,
        payload_json: row.try_get("payload_json")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

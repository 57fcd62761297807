use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadbot_core::domain::conversation::{Conversation, ConversationMode, UserId};
use leadbot_core::slots::SlotId;

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        user_id,
        mode,
        agent_deadline,
        last_activity_at,
        last_asked_slot,
        recent_message_ids_json,
        lead_json,
        version,
        created_at
     FROM conversation";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE user_id = ?"))
            .bind(&user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, RepositoryError> {
        let expected = conversation.version;
        let next = expected + 1;
        let recent_ids = serde_json::to_string(&conversation.recent_message_ids)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let lead = serde_json::to_string(&conversation.lead)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let lead_status = if conversation.lead.is_complete() { "COMPLETE" } else { "INCOMPLETE" };
        let machinery_type = conversation.lead.machinery_type().map(|machinery| machinery.key());
        let now = format_timestamp(Utc::now());

        let result = if expected == 0 {
            sqlx::query(
                "INSERT INTO conversation (
                    user_id,
                    mode,
                    agent_deadline,
                    last_activity_at,
                    last_asked_slot,
                    recent_message_ids_json,
                    lead_json,
                    lead_status,
                    machinery_type,
                    version,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(&conversation.user_id.0)
            .bind(conversation.mode.as_str())
            .bind(conversation.agent_deadline.map(format_timestamp))
            .bind(format_timestamp(conversation.last_activity_at))
            .bind(conversation.last_asked_slot.map(SlotId::key))
            .bind(&recent_ids)
            .bind(&lead)
            .bind(lead_status)
            .bind(machinery_type)
            .bind(to_i64("version", next)?)
            .bind(format_timestamp(conversation.created_at))
            .bind(&now)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE conversation SET
                    mode = ?,
                    agent_deadline = ?,
                    last_activity_at = ?,
                    last_asked_slot = ?,
                    recent_message_ids_json = ?,
                    lead_json = ?,
                    lead_status = ?,
                    machinery_type = ?,
                    version = ?,
                    updated_at = ?
                 WHERE user_id = ? AND version = ?",
            )
            .bind(conversation.mode.as_str())
            .bind(conversation.agent_deadline.map(format_timestamp))
            .bind(format_timestamp(conversation.last_activity_at))
            .bind(conversation.last_asked_slot.map(SlotId::key))
            .bind(&recent_ids)
            .bind(&lead)
            .bind(lead_status)
            .bind(machinery_type)
            .bind(to_i64("version", next)?)
            .bind(&now)
            .bind(&conversation.user_id.0)
            .bind(to_i64("version", expected)?)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                user_id: conversation.user_id.0.clone(),
                expected,
            });
        }

        Ok(next)
    }

    async fn list_expired_agent_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id
             FROM conversation
             WHERE mode = 'AGENT' AND agent_deadline < ?
             ORDER BY agent_deadline ASC",
        )
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(UserId(row.try_get("user_id")?)))
            .collect()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY updated_at DESC LIMIT ?"))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let mode_raw = row.try_get::<String, _>("mode")?;
    let mode = match mode_raw.as_str() {
        "BOT" => ConversationMode::Bot,
        "AGENT" => ConversationMode::Agent,
        other => {
            return Err(RepositoryError::Decode(format!("unknown conversation mode `{other}`")))
        }
    };

    let last_asked_slot = row
        .try_get::<Option<String>, _>("last_asked_slot")?
        .map(|value| {
            SlotId::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown slot `{value}`")))
        })
        .transpose()?;

    let recent_raw = row.try_get::<String, _>("recent_message_ids_json")?;
    let recent_message_ids = serde_json::from_str(&recent_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid recent_message_ids_json: {error}"))
    })?;

    let lead_raw = row.try_get::<String, _>("lead_json")?;
    let lead = serde_json::from_str(&lead_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid lead_json: {error}")))?;

    let version = row.try_get::<i64, _>("version")?;
    let version = u64::try_from(version).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `version`: {version}"))
    })?;

    Ok(Conversation {
        user_id: UserId(row.try_get("user_id")?),
        mode,
        agent_deadline: parse_optional_timestamp("agent_deadline", row.try_get("agent_deadline")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        last_asked_slot,
        recent_message_ids,
        lead,
        version,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

/// Fixed-width UTC form so stored timestamps compare correctly as text.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("value for `{column}` overflows i64: {value}")))
}

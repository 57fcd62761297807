use sqlx::{sqlite::SqliteRow, Row};

use leadbot_core::domain::conversation::{MessageId, UserId};
use leadbot_core::domain::transcript::{Speaker, TranscriptEntry};
use leadbot_core::slots::SlotId;

use super::conversation::{format_timestamp, parse_timestamp};
use super::{RepositoryError, TranscriptRepository};
use crate::DbPool;

pub struct SqlTranscriptRepository {
    pool: DbPool,
}

impl SqlTranscriptRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TranscriptRepository for SqlTranscriptRepository {
    async fn append(&self, entries: &[TranscriptEntry]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO transcript_entry (
                    id,
                    user_id,
                    speaker,
                    text,
                    message_id,
                    asked_slot,
                    flagged,
                    recorded_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.id)
            .bind(&entry.user_id.0)
            .bind(entry.speaker.as_str())
            .bind(&entry.text)
            .bind(entry.message_id.as_ref().map(|id| id.0.as_str()))
            .bind(entry.asked_slot.map(SlotId::key))
            .bind(&entry.flagged)
            .bind(format_timestamp(entry.recorded_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<TranscriptEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                speaker,
                text,
                message_id,
                asked_slot,
                flagged,
                recorded_at
             FROM transcript_entry
             WHERE user_id = ?
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows.into_iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }
}

fn entry_from_row(row: SqliteRow) -> Result<TranscriptEntry, RepositoryError> {
    let speaker_raw = row.try_get::<String, _>("speaker")?;
    let speaker = Speaker::parse(&speaker_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown speaker `{speaker_raw}`")))?;

    let asked_slot = row
        .try_get::<Option<String>, _>("asked_slot")?
        .map(|raw| {
            SlotId::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown asked_slot `{raw}`")))
        })
        .transpose()?;

    Ok(TranscriptEntry {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        speaker,
        text: row.try_get("text")?,
        message_id: row.try_get::<Option<String>, _>("message_id")?.map(MessageId),
        asked_slot,
        flagged: row.try_get("flagged")?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use leadbot_core::domain::conversation::{Conversation, MessageId, UserId};
    use leadbot_core::domain::transcript::{Speaker, TranscriptEntry};
    use leadbot_core::slots::SlotId;

    use super::SqlTranscriptRepository;
    use crate::migrations;
    use crate::repositories::{ConversationRepository, SqlConversationRepository, TranscriptRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn user() -> UserId {
        UserId("u-log".to_string())
    }

    #[tokio::test]
    async fn turns_are_listed_oldest_first_and_keep_their_order_within_a_turn() {
        let pool = setup_pool().await;
        let start = at("2026-03-01T09:00:00Z");
        SqlConversationRepository::new(pool.clone())
            .save(&Conversation::new(user(), start, 50))
            .await
            .expect("save conversation");
        let repo = SqlTranscriptRepository::new(pool.clone());

        let question = TranscriptEntry::new(user(), Speaker::Bot, "¿Cuál es tu nombre?", start)
            .with_asked_slot(Some(SlotId::FirstName));
        repo.append(&[
            TranscriptEntry::new(user(), Speaker::Lead, "Hola", start)
                .with_message_id(MessageId("wamid.1".to_string())),
            question.clone(),
        ])
        .await
        .expect("append first turn");

        let later = start + Duration::seconds(20);
        let refused = TranscriptEntry::new(user(), Speaker::Lead, "<script>", later)
            .with_message_id(MessageId("wamid.2".to_string()))
            .flagged("INJECTION_ATTEMPT");
        repo.append(&[refused.clone()]).await.expect("append refusal");

        let listed = repo.list_for_user(&user(), 10).await.expect("list");
        let texts: Vec<&str> = listed.iter().map(|entry| entry.text.as_str()).collect();
        assert_eq!(texts, vec!["Hola", "¿Cuál es tu nombre?", "<script>"]);
        assert_eq!(listed[1], question);
        assert_eq!(listed[2], refused);

        let tail = repo.list_for_user(&user(), 2).await.expect("list tail");
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "¿Cuál es tu nombre?");

        pool.close().await;
    }

    #[tokio::test]
    async fn a_failing_entry_rolls_back_the_whole_batch() {
        let pool = setup_pool().await;
        let start = at("2026-03-01T09:00:00Z");
        SqlConversationRepository::new(pool.clone())
            .save(&Conversation::new(user(), start, 50))
            .await
            .expect("save conversation");
        let repo = SqlTranscriptRepository::new(pool.clone());

        let orphan = TranscriptEntry::new(UserId("nobody".to_string()), Speaker::Bot, "hola", start);
        let result = repo
            .append(&[TranscriptEntry::new(user(), Speaker::Lead, "Hola", start), orphan])
            .await;

        assert!(result.is_err());
        assert!(repo.list_for_user(&user(), 10).await.expect("list").is_empty());

        pool.close().await;
    }
}

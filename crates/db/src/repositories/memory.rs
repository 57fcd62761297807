use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leadbot_core::domain::conversation::{Conversation, ConversationMode, UserId};
use leadbot_core::domain::crm::CrmSyncEvent;
use leadbot_core::domain::transcript::TranscriptEntry;

use super::{ConversationRepository, CrmSyncLogRepository, RepositoryError, TranscriptRepository};

struct StoredConversation {
    conversation: Conversation,
    write_seq: u64,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, StoredConversation>>,
    write_seq: RwLock<u64>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&user_id.0).map(|stored| stored.conversation.clone()))
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let stored_version =
            conversations.get(&conversation.user_id.0).map(|stored| stored.conversation.version);
        let expected = conversation.version;

        let fresh = match stored_version {
            None => expected == 0,
            Some(current) => expected != 0 && current == expected,
        };
        if !fresh {
            return Err(RepositoryError::VersionConflict {
                user_id: conversation.user_id.0.clone(),
                expected,
            });
        }

        let mut seq = self.write_seq.write().await;
        *seq += 1;

        let mut committed = conversation.clone();
        committed.version = expected + 1;
        conversations.insert(
            conversation.user_id.0.clone(),
            StoredConversation { conversation: committed, write_seq: *seq },
        );
        Ok(expected + 1)
    }

    async fn list_expired_agent_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut expired: Vec<(DateTime<Utc>, UserId)> = conversations
            .values()
            .filter(|stored| stored.conversation.mode == ConversationMode::Agent)
            .filter_map(|stored| {
                let deadline = stored.conversation.agent_deadline?;
                (deadline < now).then(|| (deadline, stored.conversation.user_id.clone()))
            })
            .collect();
        expired.sort();
        Ok(expired.into_iter().map(|(_, user_id)| user_id).collect())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut stored: Vec<&StoredConversation> = conversations.values().collect();
        stored.sort_by(|left, right| right.write_seq.cmp(&left.write_seq));
        Ok(stored
            .into_iter()
            .take(limit as usize)
            .map(|stored| stored.conversation.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCrmSyncLogRepository {
    events: RwLock<Vec<CrmSyncEvent>>,
}

#[async_trait::async_trait]
impl CrmSyncLogRepository for InMemoryCrmSyncLogRepository {
    async fn append(&self, event: CrmSyncEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<CrmSyncEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<CrmSyncEvent> =
            events.iter().filter(|event| &event.user_id == user_id).cloned().collect();
        matching.sort_by(|left, right| {
            left.occurred_at.cmp(&right.occurred_at).then(left.attempt.cmp(&right.attempt))
        });
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryTranscriptRepository {
    entries: RwLock<Vec<TranscriptEntry>>,
}

#[async_trait::async_trait]
impl TranscriptRepository for InMemoryTranscriptRepository {
    async fn append(&self, entries: &[TranscriptEntry]) -> Result<(), RepositoryError> {
        self.entries.write().await.extend_from_slice(entries);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<TranscriptEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<TranscriptEntry> =
            entries.iter().filter(|entry| &entry.user_id == user_id).cloned().collect();
        matching.sort_by_key(|entry| entry.recorded_at);
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use leadbot_core::domain::conversation::{Conversation, UserId};
    use leadbot_core::domain::crm::{CrmSyncEvent, CrmSyncStatus};
    use leadbot_core::domain::transcript::{Speaker, TranscriptEntry};
    use leadbot_core::domain::value::{SlotCandidate, SlotInput};
    use leadbot_core::slots::SlotId;

    use crate::repositories::{
        ConversationRepository, CrmSyncLogRepository, InMemoryConversationRepository,
        InMemoryCrmSyncLogRepository, InMemoryTranscriptRepository, RepositoryError,
        TranscriptRepository,
    };

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn in_memory_conversation_repo_enforces_versions() {
        let repo = InMemoryConversationRepository::default();
        let user = UserId("u-1".to_string());
        let conversation = Conversation::new(user.clone(), at("2026-03-01T10:00:00Z"), 50);

        assert_eq!(repo.save(&conversation).await.expect("insert"), 1);
        assert!(matches!(
            repo.save(&conversation).await,
            Err(RepositoryError::VersionConflict { expected: 0, .. })
        ));

        let mut current = repo.find(&user).await.expect("find").expect("exists");
        assert_eq!(current.version, 1);
        let stale = current.clone();

        current
            .lead
            .fill(SlotId::FirstName, SlotCandidate::Value(SlotInput::Text("Ana".to_string())));
        assert_eq!(repo.save(&current).await.expect("update"), 2);

        let error = repo.save(&stale).await.expect_err("stale write rejected");
        assert!(error.is_conflict());

        let stored = repo.find(&user).await.expect("find").expect("exists");
        assert_eq!(stored.lead.display(SlotId::FirstName).as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn in_memory_repo_lists_expired_sessions_and_recent_writes() {
        let repo = InMemoryConversationRepository::default();
        let start = at("2026-03-01T10:00:00Z");

        let mut first = Conversation::new(UserId("u-first".to_string()), start, 50);
        first.arm_agent_deadline(start, Duration::minutes(30));
        repo.save(&first).await.expect("save first");

        let second = Conversation::new(UserId("u-second".to_string()), start, 50);
        repo.save(&second).await.expect("save second");

        let expired =
            repo.list_expired_agent_sessions(start + Duration::minutes(31)).await.expect("list");
        assert_eq!(expired, vec![UserId("u-first".to_string())]);
        assert!(repo
            .list_expired_agent_sessions(start + Duration::minutes(30))
            .await
            .expect("list")
            .is_empty());

        let recent = repo.list_recent(1).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, UserId("u-second".to_string()));
    }

    #[tokio::test]
    async fn in_memory_sync_log_filters_by_user() {
        let repo = InMemoryCrmSyncLogRepository::default();
        let base = at("2026-03-01T10:00:00Z");
        for (index, user) in ["u-a", "u-b", "u-a"].into_iter().enumerate() {
            repo.append(CrmSyncEvent {
                id: format!("evt-{index}"),
                user_id: UserId(user.to_string()),
                conversation_version: 3,
                attempt: index as u32 + 1,
                status: CrmSyncStatus::Failed,
                crm_object_id: None,
                error_message: Some("timeout".to_string()),
                payload_json: "{}".to_string(),
                occurred_at: base + Duration::seconds(index as i64),
            })
            .await
            .expect("append");
        }

        let events = repo.list_for_user(&UserId("u-a".to_string())).await.expect("list");
        assert_eq!(events.iter().map(|event| event.id.as_str()).collect::<Vec<_>>(), ["evt-0", "evt-2"]);
    }

    #[tokio::test]
    async fn in_memory_transcript_keeps_the_latest_entries_in_order() {
        let repo = InMemoryTranscriptRepository::default();
        let base = at("2026-03-01T10:00:00Z");
        let user = UserId("u-a".to_string());
        let line = |user: &UserId, text: &str, offset: i64| {
            TranscriptEntry::new(user.clone(), Speaker::Lead, text, base + Duration::seconds(offset))
        };

        repo.append(&[line(&user, "uno", 0), line(&UserId("u-b".to_string()), "otro", 1)])
            .await
            .expect("append");
        repo.append(&[line(&user, "dos", 2), line(&user, "tres", 2)]).await.expect("append");

        let texts: Vec<String> = repo
            .list_for_user(&user, 2)
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.text)
            .collect();
        assert_eq!(texts, vec!["dos".to_string(), "tres".to_string()]);
    }
}

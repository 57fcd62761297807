use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leadbot_core::domain::conversation::{Conversation, UserId};
use leadbot_core::domain::crm::CrmSyncEvent;
use leadbot_core::domain::transcript::TranscriptEntry;

pub mod conversation;
pub mod crm_sync;
pub mod memory;
pub mod transcript;

pub use conversation::SqlConversationRepository;
pub use crm_sync::SqlCrmSyncLogRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryCrmSyncLogRepository, InMemoryTranscriptRepository,
};
pub use transcript::SqlTranscriptRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale write for `{user_id}`: expected version {expected}")]
    VersionConflict { user_id: String, expected: u64 },
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Per-user conversation storage with optimistic concurrency.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<Conversation>, RepositoryError>;

    /// Writes `conversation` if the stored version still equals
    /// `conversation.version` (zero means "must not exist yet") and returns
    /// the new version. A lost race yields `RepositoryError::VersionConflict`.
    async fn save(&self, conversation: &Conversation) -> Result<u64, RepositoryError>;

    /// Users in agent mode whose deadline is strictly before `now`.
    async fn list_expired_agent_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, RepositoryError>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait CrmSyncLogRepository: Send + Sync {
    async fn append(&self, event: CrmSyncEvent) -> Result<(), RepositoryError>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<CrmSyncEvent>, RepositoryError>;
}

/// Append-only record of what the lead, the bot and human agents said.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    /// Appends `entries` in order; either all of them are stored or none.
    async fn append(&self, entries: &[TranscriptEntry]) -> Result<(), RepositoryError>;

    /// The most recent `limit` entries for `user_id`, oldest first.
    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<TranscriptEntry>, RepositoryError>;
}

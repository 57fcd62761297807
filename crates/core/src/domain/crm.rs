use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{Conversation, UserId};

/// Snapshot handed to the CRM sync worker after a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmSyncRequest {
    pub user_id: UserId,
    pub conversation_version: u64,
    pub fields: BTreeMap<String, String>,
}

impl CrmSyncRequest {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            user_id: conversation.user_id.clone(),
            conversation_version: conversation.version,
            fields: conversation.lead.flatten(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmSyncStatus {
    Succeeded,
    Failed,
    Abandoned,
}

impl CrmSyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// One delivery attempt of a sync request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmSyncEvent {
    pub id: String,
    pub user_id: UserId,
    pub conversation_version: u64,
    pub attempt: u32,
    pub status: CrmSyncStatus,
    pub crm_object_id: Option<String>,
    pub error_message: Option<String>,
    pub payload_json: String,
    pub occurred_at: DateTime<Utc>,
}

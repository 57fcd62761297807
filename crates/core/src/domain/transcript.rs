use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::{MessageId, UserId};
use crate::slots::SlotId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Lead,
    Bot,
    Agent,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Bot => "bot",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lead" => Some(Self::Lead),
            "bot" => Some(Self::Bot),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

/// One line of a conversation as the user saw it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub user_id: UserId,
    pub speaker: Speaker,
    pub text: String,
    /// Channel id of the inbound message; bot and agent lines have none.
    pub message_id: Option<MessageId>,
    /// Slot the bot was waiting on when the line was written.
    pub asked_slot: Option<SlotId>,
    /// Guardrail category when a lead message was refused.
    pub flagged: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(
        user_id: UserId,
        speaker: Speaker,
        text: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            speaker,
            text: text.into(),
            message_id: None,
            asked_slot: None,
            flagged: None,
            recorded_at,
        }
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_asked_slot(mut self, slot: Option<SlotId>) -> Self {
        self.asked_slot = slot;
        self
    }

    pub fn flagged(mut self, category: &str) -> Self {
        self.flagged = Some(category.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Speaker, TranscriptEntry};
    use crate::domain::conversation::{MessageId, UserId};

    #[test]
    fn speakers_round_trip_through_their_storage_names() {
        for speaker in [Speaker::Lead, Speaker::Bot, Speaker::Agent] {
            assert_eq!(Speaker::parse(speaker.as_str()), Some(speaker));
        }
        assert_eq!(Speaker::parse("user"), None);
    }

    #[test]
    fn refused_lead_lines_keep_their_category() {
        let user = UserId("521".to_string());
        let entry = TranscriptEntry::new(user, Speaker::Lead, "<script>", Utc::now())
            .with_message_id(MessageId("wamid.1".to_string()))
            .flagged("INJECTION_ATTEMPT");

        assert_eq!(entry.flagged.as_deref(), Some("INJECTION_ATTEMPT"));
        assert_eq!(entry.message_id, Some(MessageId("wamid.1".to_string())));
        assert!(entry.asked_slot.is_none());
    }
}

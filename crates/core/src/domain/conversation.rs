use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::Lead;
use crate::errors::DomainError;
use crate::flows::FlowState;
use crate::slots::SlotId;

pub const DEFAULT_DEDUP_WINDOW: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationMode {
    Bot,
    Agent,
}

impl ConversationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "BOT",
            Self::Agent => "AGENT",
        }
    }
}

/// Bounded, insertion-ordered set of recently seen message ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMessageIds {
    capacity: usize,
    ids: VecDeque<String>,
}

impl RecentMessageIds {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), ids: VecDeque::new() }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.iter().any(|seen| seen == &id.0)
    }

    /// Returns `false` when the id was already present.
    pub fn remember(&mut self, id: &MessageId) -> bool {
        if self.contains(id) {
            return false;
        }
        while self.ids.len() >= self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.0.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: UserId,
    pub mode: ConversationMode,
    pub agent_deadline: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub last_asked_slot: Option<SlotId>,
    pub recent_message_ids: RecentMessageIds,
    pub lead: Lead,
    /// Zero until the first write; every committed mutation adds one.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: UserId, now: DateTime<Utc>, dedup_window: usize) -> Self {
        Self {
            user_id,
            mode: ConversationMode::Bot,
            agent_deadline: None,
            last_activity_at: now,
            last_asked_slot: None,
            recent_message_ids: RecentMessageIds::with_capacity(dedup_window),
            lead: Lead::default(),
            version: 0,
            created_at: now,
        }
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    pub fn flow_state(&self) -> FlowState {
        match self.mode {
            ConversationMode::Agent => FlowState::AgentMode,
            ConversationMode::Bot if self.lead.is_complete() => FlowState::LeadComplete,
            ConversationMode::Bot => FlowState::BotCollecting,
        }
    }

    pub fn is_duplicate(&self, message_id: &MessageId) -> bool {
        self.recent_message_ids.contains(message_id)
    }

    /// Clears the lead and the pending question. Identity, mode and dedup
    /// history survive.
    pub fn reset_lead(&mut self) {
        self.lead = Lead::default();
        self.last_asked_slot = None;
    }

    pub fn arm_agent_deadline(&mut self, now: DateTime<Utc>, timeout: Duration) {
        self.mode = ConversationMode::Agent;
        self.agent_deadline = Some(now + timeout);
    }

    pub fn agent_deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.mode == ConversationMode::Agent
            && self.agent_deadline.map(|deadline| now > deadline).unwrap_or(true)
    }

    pub fn return_to_bot(&mut self) {
        self.mode = ConversationMode::Bot;
        self.agent_deadline = None;
    }
}

/// Inbound channel event after transport decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn validate(&self, max_chars: usize) -> Result<(), DomainError> {
        if self.user_id.0.trim().is_empty() {
            return Err(DomainError::InvalidInbound("user_id must not be empty".to_owned()));
        }
        if self.message_id.0.trim().is_empty() {
            return Err(DomainError::InvalidInbound("message_id must not be empty".to_owned()));
        }
        if self.text.trim().is_empty() {
            return Err(DomainError::InvalidInbound("text must not be empty".to_owned()));
        }
        let length = self.text.chars().count();
        if length > max_chars {
            return Err(DomainError::InvalidInbound(format!(
                "text is {length} characters, limit is {max_chars}"
            )));
        }
        Ok(())
    }
}

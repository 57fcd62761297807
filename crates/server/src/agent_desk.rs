use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use leadbot_agent::AgentForward;
use leadbot_core::config::AgentDeskConfig;

#[derive(Debug, Error)]
pub enum AgentDeskError {
    #[error("agent desk request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent desk rejected forward with status {0}")]
    Rejected(u16),
}

/// Where user messages go while a human owns the conversation.
#[async_trait]
pub trait AgentDesk: Send + Sync {
    async fn forward(&self, forward: &AgentForward) -> Result<(), AgentDeskError>;
}

pub fn from_config(config: &AgentDeskConfig) -> Result<Box<dyn AgentDesk>, AgentDeskError> {
    match &config.forward_url {
        Some(url) => Ok(Box::new(WebhookAgentDesk::new(url.clone())?)),
        None => Ok(Box::new(LoggingAgentDesk)),
    }
}

pub struct WebhookAgentDesk {
    client: Client,
    forward_url: String,
}

impl WebhookAgentDesk {
    pub fn new(forward_url: String) -> Result<Self, AgentDeskError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, forward_url })
    }
}

#[async_trait]
impl AgentDesk for WebhookAgentDesk {
    async fn forward(&self, forward: &AgentForward) -> Result<(), AgentDeskError> {
        let response = self
            .client
            .post(&self.forward_url)
            .json(&json!({
                "user_id": forward.user_id.0,
                "text": forward.text,
                "lead": forward.lead_fields,
            }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentDeskError::Rejected(response.status().as_u16()))
        }
    }
}

/// Used when no desk is configured; agents read the forwards from the log.
pub struct LoggingAgentDesk;

#[async_trait]
impl AgentDesk for LoggingAgentDesk {
    async fn forward(&self, forward: &AgentForward) -> Result<(), AgentDeskError> {
        info!(
            event_name = "agent_desk.forwarded",
            user_id = %forward.user_id,
            text = %forward.text,
            lead_fields = forward.lead_fields.len(),
            "user message for human agent"
        );
        Ok(())
    }
}

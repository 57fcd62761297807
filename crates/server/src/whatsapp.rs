//! WhatsApp Cloud API: webhook payload parsing and the outbound sender.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use leadbot_core::config::ChannelConfig;
use leadbot_core::domain::conversation::{InboundMessage, MessageId, UserId};

const WHATSAPP_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("channel rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers bot replies and relayed agent messages to the user.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send_text(&self, to: &UserId, text: &str) -> Result<(), ChannelError>;
}

pub struct WhatsAppSender {
    client: Client,
    messages_url: String,
    access_token: SecretString,
}

impl WhatsAppSender {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.api_base_url.trim_end_matches('/'),
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    async fn send_text(&self, to: &UserId, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&text_message(to, text))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Rejected { status: status.as_u16(), body })
    }
}

fn text_message(to: &UserId, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient(&to.0),
        "type": "text",
        "text": { "preview_url": false, "body": text },
    })
}

/// Mexican mobiles arrive as `521` + ten digits; the send API only accepts
/// them without the mobile `1`.
pub fn recipient(wa_id: &str) -> String {
    match wa_id.strip_prefix("521") {
        Some(rest) if wa_id.len() >= 12 => format!("52{rest}"),
        _ => wa_id.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Verification {
    Accepted(String),
    Forbidden,
    MissingParameters,
}

pub fn verify(query: &VerifyQuery, expected_token: &str) -> Verification {
    match (&query.mode, &query.verify_token, &query.challenge) {
        (Some(mode), Some(token), Some(challenge)) => {
            if mode == "subscribe" && token == expected_token {
                Verification::Accepted(challenge.clone())
            } else {
                Verification::Forbidden
            }
        }
        _ => Verification::MissingParameters,
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub statuses: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub from: String,
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
pub struct WireText {
    pub body: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Text(InboundMessage),
    /// Media, location, reactions and the like.
    Unsupported { user_id: UserId, message_id: MessageId, kind: String },
}

impl WebhookPayload {
    pub fn is_whatsapp(&self) -> bool {
        self.object == WHATSAPP_OBJECT
    }

    pub fn status_updates(&self) -> usize {
        self.changes().map(|value| value.statuses.len()).sum()
    }

    fn changes(&self) -> impl Iterator<Item = &ChangeValue> {
        self.entry.iter().flat_map(|entry| entry.changes.iter().map(|change| &change.value))
    }

    /// Inbound user messages in delivery order. Status callbacks yield nothing.
    pub fn events(&self, received_at: DateTime<Utc>) -> Vec<ChannelEvent> {
        self.changes()
            .flat_map(|value| value.messages.iter())
            .map(|message| {
                let user_id = UserId(message.from.clone());
                let message_id = MessageId(message.id.clone());
                match (message.kind.as_str(), &message.text) {
                    ("text", Some(text)) => ChannelEvent::Text(InboundMessage {
                        user_id,
                        message_id,
                        text: text.body.clone(),
                        timestamp: message
                            .timestamp
                            .as_deref()
                            .and_then(parse_epoch_seconds)
                            .unwrap_or(received_at),
                    }),
                    _ => ChannelEvent::Unsupported { user_id, message_id, kind: message.kind.clone() },
                }
            })
            .collect()
    }
}

fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let seconds = raw.trim().parse::<i64>().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use leadbot_core::domain::conversation::{MessageId, UserId};

    use super::{
        recipient, text_message, verify, ChannelEvent, Verification, VerifyQuery, WebhookPayload,
    };

    fn query(mode: Option<&str>, token: Option<&str>, challenge: Option<&str>) -> VerifyQuery {
        VerifyQuery {
            mode: mode.map(str::to_string),
            verify_token: token.map(str::to_string),
            challenge: challenge.map(str::to_string),
        }
    }

    #[test]
    fn handshake_checks_mode_and_token() {
        assert_eq!(
            verify(&query(Some("subscribe"), Some("secreto"), Some("1158201444")), "secreto"),
            Verification::Accepted("1158201444".to_string())
        );
        assert_eq!(
            verify(&query(Some("subscribe"), Some("otro"), Some("1")), "secreto"),
            Verification::Forbidden
        );
        assert_eq!(
            verify(&query(Some("subscribe"), None, Some("1")), "secreto"),
            Verification::MissingParameters
        );
    }

    #[test]
    fn text_and_media_messages_become_events() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"messages": [
                {"from": "5213312345678", "id": "wamid.1", "timestamp": "1767268800",
                 "type": "text", "text": {"body": "Hola"}},
                {"from": "5213312345678", "id": "wamid.2", "type": "image",
                 "image": {"id": "media-1"}}
            ]}}]}]
        }))
        .expect("payload");

        let received = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("time");
        let events = payload.events(received);

        assert!(payload.is_whatsapp());
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChannelEvent::Text(message) => {
                assert_eq!(message.text, "Hola");
                assert_eq!(message.timestamp.timestamp(), 1_767_268_800);
            }
            other => panic!("expected text event, got {other:?}"),
        }
        assert_eq!(
            events[1],
            ChannelEvent::Unsupported {
                user_id: UserId("5213312345678".to_string()),
                message_id: MessageId("wamid.2".to_string()),
                kind: "image".to_string(),
            }
        );
    }

    #[test]
    fn status_callbacks_carry_no_events() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1", "status": "read"}]}}]}]
        }))
        .expect("payload");

        assert_eq!(payload.status_updates(), 1);
        assert!(payload.events(Utc::now()).is_empty());
    }

    #[test]
    fn mexican_mobile_numbers_drop_the_mobile_prefix_when_sending() {
        assert_eq!(recipient("5213312345678"), "523312345678");
        assert_eq!(recipient("523312345678"), "523312345678");
        assert_eq!(recipient("14155550123"), "14155550123");
        assert_eq!(recipient("52155"), "52155");

        let message = text_message(&UserId("5213312345678".to_string()), "Hola");
        assert_eq!(message["to"], "523312345678");
        assert_eq!(message["text"]["body"], "Hola");
    }
}

//! HTTP surface: channel webhook, generic message ingest, human-agent
//! endpoints and the on-demand timeout sweep.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use leadbot_agent::{replies, ConversationRuntime, TurnError, TurnOutcome};
use leadbot_core::domain::conversation::{InboundMessage, MessageId, UserId};
use leadbot_core::errors::{ApplicationError, InterfaceError};

use crate::agent_desk::AgentDesk;
use crate::crm::CrmSyncWorker;
use crate::whatsapp::{self, ChannelEvent, ChannelSender, Verification, VerifyQuery, WebhookPayload};

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ConversationRuntime>,
    pub channel: Arc<dyn ChannelSender>,
    pub agent_desk: Arc<dyn AgentDesk>,
    pub crm: Option<Arc<CrmSyncWorker>>,
    pub verify_token: SecretString,
    pub allowed_senders: Arc<Vec<String>>,
}

impl AppState {
    fn accepts_sender(&self, user_id: &UserId) -> bool {
        self.allowed_senders.is_empty() || self.allowed_senders.iter().any(|sender| sender == &user_id.0)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/api/v1/messages", post(receive_message))
        .route("/api/v1/agent/messages", post(agent_message))
        .route("/api/v1/agent/escalations", post(escalate))
        .route("/api/v1/sweep", post(sweep))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl ApiError {
    fn validation(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.into(),
        })
    }

    fn from_application(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    match whatsapp::verify(&query, state.verify_token.expose_secret()) {
        Verification::Accepted(challenge) => {
            info!(event_name = "channel.webhook.verified", "webhook verification accepted");
            (StatusCode::OK, challenge).into_response()
        }
        Verification::Forbidden => {
            warn!(event_name = "channel.webhook.verify_rejected", "webhook verify token mismatch");
            StatusCode::FORBIDDEN.into_response()
        }
        Verification::MissingParameters => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|parse_error| {
        ApiError::validation(format!("malformed webhook payload: {parse_error}"), &correlation_id)
    })?;
    if !payload.is_whatsapp() {
        return Err(ApiError::validation(
            format!("unsupported webhook object `{}`", payload.object),
            &correlation_id,
        ));
    }

    let received_at = Utc::now();
    let statuses = payload.status_updates();
    if statuses > 0 {
        debug!(event_name = "channel.webhook.statuses", statuses, "status callbacks ignored");
    }

    for event in payload.events(received_at) {
        match event {
            ChannelEvent::Text(message) => {
                if !state.accepts_sender(&message.user_id) {
                    debug!(
                        event_name = "channel.webhook.sender_ignored",
                        user_id = %message.user_id,
                        "sender is not in the allow-list"
                    );
                    continue;
                }
                handle_channel_message(&state, message, received_at).await;
            }
            ChannelEvent::Unsupported { user_id, message_id, kind } => {
                if !state.accepts_sender(&user_id) {
                    continue;
                }
                info!(
                    event_name = "channel.webhook.unsupported",
                    user_id = %user_id,
                    message_id = %message_id.0,
                    kind = %kind,
                    "non-text message received"
                );
                send_reply(&state, &user_id, replies::TEXT_ONLY).await;
            }
        }
    }

    Ok((StatusCode::OK, Json(json!({ "status": "received" }))).into_response())
}

/// Channel messages always end with something sent back: the turn's reply,
/// or a templated fallback when the turn could not be processed.
async fn handle_channel_message(state: &AppState, message: InboundMessage, now: DateTime<Utc>) {
    let user_id = message.user_id.clone();
    let message_id = message.message_id.clone();

    match state.runtime.handle_inbound(message, now).await {
        Ok(outcome) => dispatch(state, &outcome, true).await,
        Err(turn_error) => {
            let reply = match &turn_error {
                TurnError::Invalid(_) => replies::SAFE_REFUSAL,
                _ => replies::TECHNICAL_ERROR,
            };
            error!(
                event_name = "conversation.turn.failed",
                correlation_id = %message_id.0,
                user_id = %user_id,
                error = %turn_error,
                "inbound message could not be processed"
            );
            send_reply(state, &user_id, reply).await;
        }
    }
}

/// Carries out a committed turn's side effects. None of them can undo the
/// commit; failures are logged.
async fn dispatch(state: &AppState, outcome: &TurnOutcome, deliver_reply: bool) {
    if deliver_reply {
        if let Some(reply) = &outcome.reply {
            send_reply(state, &outcome.user_id, reply).await;
        }
    }

    if let Some(forward) = &outcome.forward_to_agent {
        if let Err(desk_error) = state.agent_desk.forward(forward).await {
            warn!(
                event_name = "agent_desk.forward_failed",
                user_id = %forward.user_id,
                error = %desk_error,
                "failed to forward message to agent desk"
            );
        }
    }

    if let Some(request) = outcome.crm_sync.clone() {
        match &state.crm {
            Some(worker) => {
                worker.spawn(request);
            }
            None => debug!(
                event_name = "crm.sync.disabled",
                user_id = %outcome.user_id,
                "crm sync skipped; integration disabled"
            ),
        }
    }
}

async fn send_reply(state: &AppState, user_id: &UserId, text: &str) {
    if let Err(send_error) = state.channel.send_text(user_id, text).await {
        warn!(
            event_name = "channel.send.failed",
            user_id = %user_id,
            error = %send_error,
            "failed to deliver reply"
        );
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub user_id: String,
    pub message_id: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub user_id: String,
    pub reply_text: Option<String>,
    pub escalate: bool,
}

async fn receive_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let now = Utc::now();
    let correlation_id = request.message_id.clone();
    let message = InboundMessage {
        user_id: UserId(request.user_id),
        message_id: MessageId(request.message_id),
        text: request.text,
        timestamp: request.timestamp.unwrap_or(now),
    };

    let outcome = state
        .runtime
        .handle_inbound(message, now)
        .await
        .map_err(|turn_error| ApiError::from_application(turn_error, &correlation_id))?;
    dispatch(&state, &outcome, false).await;

    Ok(Json(MessageResponse {
        user_id: outcome.user_id.0,
        reply_text: outcome.reply,
        escalate: outcome.escalate,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AgentMessageRequest {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalationRequest {
    pub user_id: String,
}

fn required_user_id(raw: String, correlation_id: &str) -> Result<UserId, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::validation("user_id must not be empty", correlation_id));
    }
    Ok(UserId(raw))
}

async fn agent_message(
    State(state): State<AppState>,
    Json(request): Json<AgentMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let user_id = required_user_id(request.user_id, &correlation_id)?;
    if request.text.trim().is_empty() {
        return Err(ApiError::validation("agent text must not be empty", &correlation_id));
    }

    let outcome = state
        .runtime
        .handle_agent_message(&user_id, &request.text, Utc::now())
        .await
        .map_err(|turn_error| ApiError::from_application(turn_error, &correlation_id))?;

    if let Some(reply) = &outcome.reply {
        state.channel.send_text(&user_id, reply).await.map_err(|send_error| {
            ApiError::from_application(
                ApplicationError::Integration(send_error.to_string()),
                &correlation_id,
            )
        })?;
    }
    Ok(Json(json!({ "user_id": user_id.0, "delivered": true })))
}

async fn escalate(
    State(state): State<AppState>,
    Json(request): Json<EscalationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let user_id = required_user_id(request.user_id, &correlation_id)?;
    let outcome = state
        .runtime
        .escalate(&user_id, Utc::now())
        .await
        .map_err(|turn_error| ApiError::from_application(turn_error, &correlation_id))?;
    dispatch(&state, &outcome, true).await;

    Ok(Json(json!({ "user_id": outcome.user_id.0, "escalate": outcome.escalate })))
}

async fn sweep(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let reverted = state
        .runtime
        .sweep(Utc::now())
        .await
        .map_err(|turn_error| ApiError::from_application(turn_error, &correlation_id))?;
    Ok(Json(json!({ "reverted": reverted })))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use leadbot_agent::guardrails::{GuardrailClassifiers, GuardrailPipeline};
    use leadbot_agent::replies;
    use leadbot_agent::slot_filling::{ExtractionPolicy, SlotFillingEngine};
    use leadbot_agent::testing::{ScriptedClassifier, ScriptedExtractor};
    use leadbot_agent::{AgentForward, ConversationRuntime, RuntimeSettings};
    use leadbot_core::config::AppConfig;
    use leadbot_core::domain::conversation::UserId;
    use leadbot_db::InMemoryConversationRepository;

    use super::{router, AppState};
    use crate::agent_desk::{AgentDesk, AgentDeskError};
    use crate::whatsapp::{ChannelError, ChannelSender};

    const USER: &str = "5213312345678";

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send_text(&self, to: &UserId, text: &str) -> Result<(), ChannelError> {
            self.sent.lock().expect("sent lock").push((to.0.clone(), text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDesk {
        forwards: Mutex<Vec<AgentForward>>,
    }

    #[async_trait]
    impl AgentDesk for RecordingDesk {
        async fn forward(&self, forward: &AgentForward) -> Result<(), AgentDeskError> {
            self.forwards.lock().expect("desk lock").push(forward.clone());
            Ok(())
        }
    }

    struct Harness {
        app: Router,
        sender: Arc<RecordingSender>,
        desk: Arc<RecordingDesk>,
    }

    fn harness(allowed_senders: Vec<String>) -> Harness {
        let config = AppConfig::default();
        let guardrails = GuardrailPipeline::new(
            &config.guardrails,
            GuardrailClassifiers {
                domain: Arc::new(ScriptedClassifier::valid()),
                safety: Arc::new(ScriptedClassifier::valid()),
                groundness: Arc::new(ScriptedClassifier::valid()),
            },
        )
        .expect("pipeline");
        let policy = ExtractionPolicy {
            max_retries: 0,
            initial_backoff: std::time::Duration::from_millis(1),
            call_timeout: std::time::Duration::from_millis(200),
        };
        let runtime = ConversationRuntime::new(
            Arc::new(InMemoryConversationRepository::default()),
            guardrails,
            SlotFillingEngine::new(Arc::new(ScriptedExtractor::new(Vec::new())), policy),
            RuntimeSettings::default(),
        );

        let sender = Arc::new(RecordingSender::default());
        let desk = Arc::new(RecordingDesk::default());
        let state = AppState {
            runtime: Arc::new(runtime),
            channel: sender.clone(),
            agent_desk: desk.clone(),
            crm: None,
            verify_token: SecretString::from("verify-me".to_string()),
            allowed_senders: Arc::new(allowed_senders),
        };
        Harness { app: router(state), sender, desk }
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn text_webhook(from: &str, id: &str, body: &str) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"messages": [
                {"from": from, "id": id, "timestamp": "1767268800", "type": "text", "text": {"body": body}}
            ]}}]}]
        })
    }

    fn as_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json body")
    }

    #[tokio::test]
    async fn verification_handshake_echoes_challenge() {
        let harness = harness(Vec::new());
        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).expect("request");

        let (status, body) = call(
            &harness.app,
            get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=4242"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"4242");

        let (status, _) = call(
            &harness.app,
            get("/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=4242"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&harness.app, get("/webhook?hub.mode=subscribe")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn first_text_message_is_answered_with_greeting() {
        let harness = harness(Vec::new());

        let (status, _) =
            call(&harness.app, post_json("/webhook", text_webhook(USER, "wamid.1", "Hola"))).await;

        assert_eq!(status, StatusCode::OK);
        let sent = harness.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, USER);
        assert!(sent[0].1.starts_with(replies::GREETING));
    }

    #[tokio::test]
    async fn redelivered_webhook_is_answered_once() {
        let harness = harness(Vec::new());
        let payload = text_webhook(USER, "wamid.1", "Hola");

        call(&harness.app, post_json("/webhook", payload.clone())).await;
        let (status, _) = call(&harness.app, post_json("/webhook", payload)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(harness.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn media_gets_text_only_reply_and_statuses_are_ignored() {
        let harness = harness(Vec::new());
        let media = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"messages": [
                {"from": USER, "id": "wamid.9", "type": "audio", "audio": {"id": "a-1"}}
            ]}}]}]
        });
        let statuses = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1", "status": "delivered"}]}}]}]
        });

        let (status, _) = call(&harness.app, post_json("/webhook", media)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&harness.app, post_json("/webhook", statuses)).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(harness.sender.sent(), vec![(USER.to_string(), replies::TEXT_ONLY.to_string())]);
    }

    #[tokio::test]
    async fn malformed_webhook_is_a_bad_request() {
        let harness = harness(Vec::new());

        let (status, body) =
            call(&harness.app, post_json("/webhook", json!({"entry": "nope"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(as_json(&body)["correlation_id"].as_str().is_some());
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn senders_outside_allow_list_are_ignored() {
        let harness = harness(vec!["5213300000000".to_string()]);

        let (status, _) =
            call(&harness.app, post_json("/webhook", text_webhook(USER, "wamid.1", "Hola"))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn handoff_via_api_escalates_and_forwards_later_messages() {
        let harness = harness(Vec::new());

        let (status, body) = call(
            &harness.app,
            post_json("/api/v1/messages", json!({"user_id": USER, "message_id": "m1", "text": "Asesor"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = as_json(&body);
        assert_eq!(body["escalate"], true);
        assert!(body["reply_text"].as_str().is_some_and(|reply| reply.contains(replies::HANDOFF_ACK)));

        let (status, body) = call(
            &harness.app,
            post_json(
                "/api/v1/messages",
                json!({"user_id": USER, "message_id": "m2", "text": "¿Tienen generadores de 50 kVA?"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["reply_text"], Value::Null);

        let forwards = harness.desk.forwards.lock().expect("desk lock").clone();
        assert_eq!(forwards.len(), 2);
        assert_eq!(forwards[1].text, "¿Tienen generadores de 50 kVA?");
    }

    #[tokio::test]
    async fn agent_message_is_relayed_through_the_channel() {
        let harness = harness(Vec::new());
        call(&harness.app, post_json("/api/v1/agent/escalations", json!({"user_id": USER}))).await;

        let (status, _) = call(
            &harness.app,
            post_json("/api/v1/agent/messages", json!({"user_id": USER, "text": "Hola, soy Ana"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(harness.sender.sent(), vec![(USER.to_string(), "Hola, soy Ana".to_string())]);
    }

    #[tokio::test]
    async fn agent_message_outside_agent_mode_is_rejected() {
        let harness = harness(Vec::new());
        call(
            &harness.app,
            post_json("/api/v1/messages", json!({"user_id": USER, "message_id": "m1", "text": "status"})),
        )
        .await;

        let (status, _) = call(
            &harness.app,
            post_json("/api/v1/agent/messages", json!({"user_id": USER, "text": "Hola"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn agent_endpoints_refuse_a_blank_user_id() {
        let harness = harness(Vec::new());

        let (status, body) =
            call(&harness.app, post_json("/api/v1/agent/escalations", json!({"user_id": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(as_json(&body)["correlation_id"].as_str().is_some());

        let (status, _) = call(
            &harness.app,
            post_json("/api/v1/agent/messages", json!({"user_id": "", "text": "Hola"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(harness.desk.forwards.lock().expect("desk lock").is_empty());
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn invalid_inbound_returns_bad_request_with_correlation_id() {
        let harness = harness(Vec::new());

        let (status, body) = call(
            &harness.app,
            post_json("/api/v1/messages", json!({"user_id": USER, "message_id": "m-empty", "text": "   "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(as_json(&body)["correlation_id"], "m-empty");
    }

    #[tokio::test]
    async fn sweep_reports_reverted_count() {
        let harness = harness(Vec::new());

        let (status, body) =
            call(&harness.app, Request::post("/api/v1/sweep").body(Body::empty()).expect("request"))
                .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["reverted"], 0);
    }
}

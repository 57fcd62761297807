//! CRM delivery of completed leads.
//!
//! A committed turn that completes or corrects a lead yields a
//! `CrmSyncRequest`. `CrmSyncWorker` pushes it to the CRM on a detached task,
//! retries transient failures with exponential backoff and records every
//! attempt in the sync log. The reply to the user never waits on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use leadbot_core::config::CrmConfig;
use leadbot_core::domain::crm::{CrmSyncEvent, CrmSyncRequest, CrmSyncStatus};
use leadbot_core::domain::machinery::MachineryType;
use leadbot_db::CrmSyncLogRepository;

const CRM_SYNC_MAX_RETRY_DELAY_SECONDS: u64 = 3600;
const CONVERSATION_ID_PROPERTY: &str = "id_conversacion_bot";
const NOT_PROVIDED: &str = "not_provided";

/// Lead keys with a dedicated contact property.
const CONTACT_PROPERTIES: &[(&str, &str)] = &[
    ("first_name", "firstname"),
    ("last_name", "lastname"),
    ("phone", "phone"),
    ("email", "email"),
    ("company_name", "company"),
    ("industry", "giro_de_la_empresa_"),
    ("location", "estado___region"),
    ("website", "pgina_web_de_tu_negocio"),
    ("usage_type", "tipo_de_uso"),
];

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("crm returned status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("crm response was malformed: {0}")]
    Malformed(String),
}

impl CrmError {
    /// Network failures, throttling and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Creates or updates the contact for the request and returns its CRM id.
    async fn upsert_lead(&self, request: &CrmSyncRequest) -> Result<String, CrmError>;
}

/// HubSpot contact upsert keyed by the conversation id property.
pub struct HubSpotClient {
    client: Client,
    base_url: String,
    access_token: SecretString,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContactRecord>,
}

#[derive(Deserialize)]
struct ContactRecord {
    id: String,
}

impl HubSpotClient {
    pub fn new(base_url: impl Into<String>, access_token: SecretString) -> Result<Self, CrmError> {
        let client = Client::builder().timeout(Duration::from_secs(20)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// `None` when CRM sync is disabled.
    pub fn from_config(config: &CrmConfig) -> Result<Option<Self>, CrmError> {
        match (config.enabled, &config.access_token) {
            (true, Some(token)) => Self::new(config.base_url.clone(), token.clone()).map(Some),
            _ => Ok(None),
        }
    }

    fn contacts_url(&self) -> String {
        format!("{}/crm/v3/objects/contacts", self.base_url)
    }

    async fn find_contact(&self, conversation_id: &str) -> Result<Option<String>, CrmError> {
        let response = self
            .client
            .post(format!("{}/search", self.contacts_url()))
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({
                "filterGroups": [{
                    "filters": [{
                        "propertyName": CONVERSATION_ID_PROPERTY,
                        "operator": "EQ",
                        "value": conversation_id,
                    }]
                }],
                "limit": 1,
            }))
            .send()
            .await?;
        let body: SearchResponse = read_json(response).await?;
        Ok(body.results.into_iter().next().map(|record| record.id))
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    async fn upsert_lead(&self, request: &CrmSyncRequest) -> Result<String, CrmError> {
        let properties = contact_properties(request);
        let conversation_id = conversation_property(request);

        let builder = match self.find_contact(&conversation_id).await? {
            Some(contact_id) => {
                self.client.patch(format!("{}/{contact_id}", self.contacts_url()))
            }
            None => self.client.post(self.contacts_url()),
        };
        let response = builder
            .bearer_auth(self.access_token.expose_secret())
            .json(&json!({ "properties": properties }))
            .send()
            .await?;
        let record: ContactRecord = read_json(response).await?;
        Ok(record.id)
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, CrmError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CrmError::Rejected { status: status.as_u16(), body });
    }
    if status == StatusCode::NO_CONTENT {
        return Err(CrmError::Malformed("empty response body".to_string()));
    }
    response.json::<T>().await.map_err(|error| CrmError::Malformed(error.to_string()))
}

fn conversation_property(request: &CrmSyncRequest) -> String {
    format!("conv_{}", request.user_id.0)
}

/// Maps flattened lead fields onto contact properties. Declined answers are
/// left out; technical slots are folded into one readable property.
pub fn contact_properties(request: &CrmSyncRequest) -> Map<String, Value> {
    let mut properties = Map::new();
    properties
        .insert(CONVERSATION_ID_PROPERTY.to_string(), Value::from(conversation_property(request)));
    properties.insert("lifecyclestage".to_string(), Value::from("lead"));

    let mut technical = Vec::new();
    for (key, value) in &request.fields {
        if value == NOT_PROVIDED {
            continue;
        }
        if let Some((_, property)) = CONTACT_PROPERTIES.iter().find(|(lead_key, _)| lead_key == key) {
            properties.insert((*property).to_string(), Value::from(value.as_str()));
        } else if key == "machinery_type" {
            let label = MachineryType::parse(value).map_or(value.as_str(), |machinery| machinery.label());
            properties
                .insert("en_que_producto_estas_interesado_".to_string(), Value::from(label));
        } else {
            technical.push(format!("{}: {value}", key.replace('_', " ")));
        }
    }
    if !technical.is_empty() {
        properties.insert(
            "caracteristicas_de_maquinaria_de_interes".to_string(),
            Value::from(technical.join("; ")),
        );
    }
    properties
}

/// Seconds to wait before the attempt after `attempt`: `base * 2^(attempt-1)`,
/// capped at one hour.
pub fn retry_delay_secs(base_secs: u64, attempt: u32) -> u64 {
    let mut delay = base_secs;
    for _ in 1..attempt.max(1) {
        delay = delay.saturating_mul(2);
    }
    delay.min(CRM_SYNC_MAX_RETRY_DELAY_SECONDS)
}

pub struct CrmSyncWorker {
    client: Arc<dyn CrmClient>,
    log: Arc<dyn CrmSyncLogRepository>,
    max_attempts: u32,
    base_retry_delay_secs: u64,
}

impl CrmSyncWorker {
    pub fn new(
        client: Arc<dyn CrmClient>,
        log: Arc<dyn CrmSyncLogRepository>,
        config: &CrmConfig,
    ) -> Self {
        Self {
            client,
            log,
            max_attempts: config.max_attempts.max(1),
            base_retry_delay_secs: config.base_retry_delay_secs,
        }
    }

    pub fn spawn(self: &Arc<Self>, request: CrmSyncRequest) -> JoinHandle<CrmSyncStatus> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run(request).await })
    }

    /// Delivers one request, retrying until success, a terminal error or the
    /// attempt budget runs out.
    pub async fn run(&self, request: CrmSyncRequest) -> CrmSyncStatus {
        let payload_json = serde_json::to_string(&request.fields).unwrap_or_default();

        for attempt in 1..=self.max_attempts {
            match self.client.upsert_lead(&request).await {
                Ok(crm_object_id) => {
                    info!(
                        event_name = "crm.sync.succeeded",
                        user_id = %request.user_id,
                        conversation_version = request.conversation_version,
                        attempt,
                        crm_object_id = %crm_object_id,
                        "lead synced to crm"
                    );
                    let status = CrmSyncStatus::Succeeded;
                    self.record(&request, attempt, status, Some(crm_object_id), None, &payload_json)
                        .await;
                    return CrmSyncStatus::Succeeded;
                }
                Err(sync_error) => {
                    let message = sync_error.to_string();
                    let failed = Some(message.clone());
                    self.record(&request, attempt, CrmSyncStatus::Failed, None, failed, &payload_json)
                        .await;

                    if !sync_error.is_retryable() || attempt == self.max_attempts {
                        error!(
                            event_name = "crm.sync.abandoned",
                            user_id = %request.user_id,
                            conversation_version = request.conversation_version,
                            attempt,
                            error = %message,
                            "crm sync abandoned"
                        );
                        let status = CrmSyncStatus::Abandoned;
                        self.record(&request, attempt, status, None, Some(message), &payload_json)
                            .await;
                        return CrmSyncStatus::Abandoned;
                    }

                    let delay = retry_delay_secs(self.base_retry_delay_secs, attempt);
                    warn!(
                        event_name = "crm.sync.retrying",
                        user_id = %request.user_id,
                        attempt,
                        retry_in_secs = delay,
                        error = %message,
                        "crm sync failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }

        CrmSyncStatus::Abandoned
    }

    async fn record(
        &self,
        request: &CrmSyncRequest,
        attempt: u32,
        status: CrmSyncStatus,
        crm_object_id: Option<String>,
        error_message: Option<String>,
        payload_json: &str,
    ) {
        let event = CrmSyncEvent {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            conversation_version: request.conversation_version,
            attempt,
            status,
            crm_object_id,
            error_message,
            payload_json: payload_json.to_string(),
            occurred_at: Utc::now(),
        };
        if let Err(log_error) = self.log.append(event).await {
            warn!(
                event_name = "crm.sync.log_failed",
                user_id = %request.user_id,
                error = %log_error,
                "failed to record crm sync attempt"
            );
        }
    }
}

use std::sync::Arc;

use leadbot_agent::extraction::LlmSlotExtractor;
use leadbot_agent::guardrails::{
    ClassifierTask, GuardrailClassifiers, GuardrailError, GuardrailPipeline, LlmClassifier,
};
use leadbot_agent::llm::LlmClient;
use leadbot_agent::slot_filling::{ExtractionPolicy, SlotFillingEngine};
use leadbot_agent::{ConversationRuntime, RuntimeSettings};
use leadbot_core::config::{AppConfig, ConfigError, LoadOptions};
use leadbot_db::{
    connect_with_config, migrations, DbPool, SqlConversationRepository, SqlCrmSyncLogRepository,
    SqlTranscriptRepository,
};
use thiserror::Error;
use tracing::info;

use crate::agent_desk::{self, AgentDeskError};
use crate::api::AppState;
use crate::crm::{CrmError, CrmSyncWorker, HubSpotClient};
use crate::llm_http::HttpLlmClient;
use crate::whatsapp::{ChannelError, WhatsAppSender};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(String),
    #[error(transparent)]
    Guardrails(#[from] GuardrailError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Crm(#[from] CrmError),
    #[error(transparent)]
    AgentDesk(#[from] AgentDeskError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> = Arc::new(
        HttpLlmClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(format!("{error:#}")))?,
    );
    let classifier = |task| Arc::new(LlmClassifier::new(Arc::clone(&llm), task));
    let guardrails = GuardrailPipeline::new(
        &config.guardrails,
        GuardrailClassifiers {
            domain: classifier(ClassifierTask::Domain),
            safety: classifier(ClassifierTask::Safety),
            groundness: classifier(ClassifierTask::Groundness),
        },
    )?;
    let slot_filling = SlotFillingEngine::new(
        Arc::new(LlmSlotExtractor::new(Arc::clone(&llm))),
        ExtractionPolicy::from_config(&config.conversation, &config.llm),
    );

    let runtime = ConversationRuntime::new(
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        guardrails,
        slot_filling,
        RuntimeSettings::from_config(&config),
    )
    .with_transcript(Arc::new(SqlTranscriptRepository::new(db_pool.clone())));

    let crm = match HubSpotClient::from_config(&config.crm)? {
        Some(client) => Some(Arc::new(CrmSyncWorker::new(
            Arc::new(client),
            Arc::new(SqlCrmSyncLogRepository::new(db_pool.clone())),
            &config.crm,
        ))),
        None => None,
    };
    info!(
        event_name = "system.bootstrap.integrations",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        crm_enabled = crm.is_some(),
        agent_desk = config.agent_desk.forward_url.is_some(),
        "integrations initialized"
    );

    let state = AppState {
        runtime: Arc::new(runtime),
        channel: Arc::new(WhatsAppSender::from_config(&config.channel)?),
        agent_desk: Arc::from(agent_desk::from_config(&config.agent_desk)?),
        crm,
        verify_token: config.channel.verify_token.clone(),
        allowed_senders: Arc::new(config.channel.allowed_senders.clone()),
    };

    Ok(Application { config, db_pool, state })
}

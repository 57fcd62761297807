use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub guardrails: GuardrailConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub agent_desk: AgentDeskConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// WhatsApp Cloud API credentials and sender allow-list.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub verify_token: SecretString,
    pub access_token: SecretString,
    pub phone_number_id: String,
    pub api_base_url: String,
    pub allowed_senders: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub max_message_chars: usize,
    pub min_confidence: f32,
    pub pattern_timeout_ms: u64,
    pub domain_timeout_ms: u64,
    pub safety_timeout_ms: u64,
    pub groundness_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub agent_timeout_minutes: u32,
    pub dedup_window: usize,
    pub max_conflict_retries: u32,
    pub extraction_max_retries: u32,
    pub extraction_backoff_ms: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub access_token: Option<SecretString>,
    pub max_attempts: u32,
    pub base_retry_delay_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentDeskConfig {
    pub forward_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub channel_verify_token: Option<String>,
    pub channel_access_token: Option<String>,
    pub channel_phone_number_id: Option<String>,
    pub server_port: Option<u16>,
    pub crm_enabled: Option<bool>,
    pub crm_access_token: Option<String>,
    pub agent_desk_forward_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                verify_token: String::new().into(),
                access_token: String::new().into(),
                phone_number_id: String::new(),
                api_base_url: "https://graph.facebook.com/v20.0".to_string(),
                allowed_senders: Vec::new(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            guardrails: GuardrailConfig {
                max_message_chars: 1000,
                min_confidence: 0.5,
                pattern_timeout_ms: 250,
                domain_timeout_ms: 5_000,
                safety_timeout_ms: 5_000,
                groundness_timeout_ms: 5_000,
            },
            conversation: ConversationConfig {
                agent_timeout_minutes: 30,
                dedup_window: 50,
                max_conflict_retries: 3,
                extraction_max_retries: 3,
                extraction_backoff_ms: 200,
                sweep_interval_secs: 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                enabled: false,
                base_url: "https://api.hubapi.com".to_string(),
                access_token: None,
                max_attempts: 5,
                base_retry_delay_secs: 30,
            },
            agent_desk: AgentDeskConfig { forward_url: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(channel) = patch.channel {
            if let Some(verify_token) = channel.verify_token {
                self.channel.verify_token = secret_value(verify_token);
            }
            if let Some(access_token) = channel.access_token {
                self.channel.access_token = secret_value(access_token);
            }
            set(&mut self.channel.phone_number_id, channel.phone_number_id);
            set(&mut self.channel.api_base_url, channel.api_base_url);
            set(&mut self.channel.allowed_senders, channel.allowed_senders);
        }

        if let Some(llm) = patch.llm {
            set(&mut self.llm.provider, llm.provider);
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            set(&mut self.llm.model, llm.model);
            set(&mut self.llm.timeout_secs, llm.timeout_secs);
            set(&mut self.llm.max_retries, llm.max_retries);
        }

        if let Some(guardrails) = patch.guardrails {
            set(&mut self.guardrails.max_message_chars, guardrails.max_message_chars);
            set(&mut self.guardrails.min_confidence, guardrails.min_confidence);
            set(&mut self.guardrails.pattern_timeout_ms, guardrails.pattern_timeout_ms);
            set(&mut self.guardrails.domain_timeout_ms, guardrails.domain_timeout_ms);
            set(&mut self.guardrails.safety_timeout_ms, guardrails.safety_timeout_ms);
            set(&mut self.guardrails.groundness_timeout_ms, guardrails.groundness_timeout_ms);
        }

        if let Some(conversation) = patch.conversation {
            set(&mut self.conversation.agent_timeout_minutes, conversation.agent_timeout_minutes);
            set(&mut self.conversation.dedup_window, conversation.dedup_window);
            set(&mut self.conversation.max_conflict_retries, conversation.max_conflict_retries);
            set(&mut self.conversation.extraction_max_retries, conversation.extraction_max_retries);
            set(&mut self.conversation.extraction_backoff_ms, conversation.extraction_backoff_ms);
            set(&mut self.conversation.sweep_interval_secs, conversation.sweep_interval_secs);
        }

        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.port, server.port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(crm) = patch.crm {
            set(&mut self.crm.enabled, crm.enabled);
            set(&mut self.crm.base_url, crm.base_url);
            if let Some(access_token) = crm.access_token {
                self.crm.access_token = Some(secret_value(access_token));
            }
            set(&mut self.crm.max_attempts, crm.max_attempts);
            set(&mut self.crm.base_retry_delay_secs, crm.base_retry_delay_secs);
        }

        if let Some(agent_desk) = patch.agent_desk {
            if let Some(forward_url) = agent_desk.forward_url {
                self.agent_desk.forward_url = Some(forward_url);
            }
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("LEADBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("LEADBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_CHANNEL_VERIFY_TOKEN") {
            self.channel.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_CHANNEL_ACCESS_TOKEN") {
            self.channel.access_token = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_CHANNEL_PHONE_NUMBER_ID") {
            self.channel.phone_number_id = value;
        }
        if let Some(value) = read_env("LEADBOT_CHANNEL_API_BASE_URL") {
            self.channel.api_base_url = value;
        }
        if let Some(value) = read_env("LEADBOT_CHANNEL_ALLOWED_SENDERS") {
            self.channel.allowed_senders = value
                .split(',')
                .map(str::trim)
                .filter(|sender| !sender.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("LEADBOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LEADBOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADBOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADBOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEADBOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("LEADBOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("LEADBOT_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_GUARDRAILS_MAX_MESSAGE_CHARS") {
            self.guardrails.max_message_chars =
                parse_env("LEADBOT_GUARDRAILS_MAX_MESSAGE_CHARS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_GUARDRAILS_MIN_CONFIDENCE") {
            self.guardrails.min_confidence = parse_env("LEADBOT_GUARDRAILS_MIN_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_GUARDRAILS_DOMAIN_TIMEOUT_MS") {
            self.guardrails.domain_timeout_ms =
                parse_env("LEADBOT_GUARDRAILS_DOMAIN_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_GUARDRAILS_SAFETY_TIMEOUT_MS") {
            self.guardrails.safety_timeout_ms =
                parse_env("LEADBOT_GUARDRAILS_SAFETY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_GUARDRAILS_GROUNDNESS_TIMEOUT_MS") {
            self.guardrails.groundness_timeout_ms =
                parse_env("LEADBOT_GUARDRAILS_GROUNDNESS_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_CONVERSATION_AGENT_TIMEOUT_MINUTES") {
            self.conversation.agent_timeout_minutes =
                parse_env("LEADBOT_CONVERSATION_AGENT_TIMEOUT_MINUTES", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_CONVERSATION_DEDUP_WINDOW") {
            self.conversation.dedup_window = parse_env("LEADBOT_CONVERSATION_DEDUP_WINDOW", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_CONVERSATION_MAX_CONFLICT_RETRIES") {
            self.conversation.max_conflict_retries =
                parse_env("LEADBOT_CONVERSATION_MAX_CONFLICT_RETRIES", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_CONVERSATION_EXTRACTION_MAX_RETRIES") {
            self.conversation.extraction_max_retries =
                parse_env("LEADBOT_CONVERSATION_EXTRACTION_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_CONVERSATION_SWEEP_INTERVAL_SECS") {
            self.conversation.sweep_interval_secs =
                parse_env("LEADBOT_CONVERSATION_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADBOT_SERVER_PORT") {
            self.server.port = parse_env("LEADBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("LEADBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_CRM_ENABLED") {
            self.crm.enabled = parse_env("LEADBOT_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        if let Some(value) = read_env("LEADBOT_CRM_ACCESS_TOKEN") {
            self.crm.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADBOT_CRM_MAX_ATTEMPTS") {
            self.crm.max_attempts = parse_env("LEADBOT_CRM_MAX_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_AGENT_DESK_FORWARD_URL") {
            self.agent_desk.forward_url = Some(value);
        }

        let log_level = read_env("LEADBOT_LOGGING_LEVEL").or_else(|| read_env("LEADBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADBOT_LOGGING_FORMAT").or_else(|| read_env("LEADBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.llm.provider, overrides.llm_provider);
        set(&mut self.llm.model, overrides.llm_model);
        if let Some(verify_token) = overrides.channel_verify_token {
            self.channel.verify_token = secret_value(verify_token);
        }
        if let Some(access_token) = overrides.channel_access_token {
            self.channel.access_token = secret_value(access_token);
        }
        set(&mut self.channel.phone_number_id, overrides.channel_phone_number_id);
        set(&mut self.server.port, overrides.server_port);
        set(&mut self.crm.enabled, overrides.crm_enabled);
        if let Some(access_token) = overrides.crm_access_token {
            self.crm.access_token = Some(secret_value(access_token));
        }
        if let Some(forward_url) = overrides.agent_desk_forward_url {
            self.agent_desk.forward_url = Some(forward_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_llm(&self.llm)?;
        validate_guardrails(&self.guardrails)?;
        validate_conversation(&self.conversation)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_agent_desk(&self.agent_desk)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadbot.toml"), PathBuf::from("config/leadbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.verify_token is required. Use the same value configured as the webhook Verify Token in the Meta developer console".to_string(),
        ));
    }

    if channel.access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.access_token is required. Generate it under WhatsApp > API Setup in the Meta developer console".to_string(),
        ));
    }

    if channel.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.phone_number_id is required (WhatsApp > API Setup > Phone number ID)"
                .to_string(),
        ));
    }
    if !channel.phone_number_id.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ConfigError::Validation(
            "channel.phone_number_id must be numeric (hint: it is the id, not the phone number with `+`)"
                .to_string(),
        ));
    }

    validate_http_url("channel.api_base_url", &channel.api_base_url)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.max_message_chars == 0 {
        return Err(ConfigError::Validation(
            "guardrails.max_message_chars must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&guardrails.min_confidence) {
        return Err(ConfigError::Validation(
            "guardrails.min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }

    let budgets = [
        ("guardrails.pattern_timeout_ms", guardrails.pattern_timeout_ms),
        ("guardrails.domain_timeout_ms", guardrails.domain_timeout_ms),
        ("guardrails.safety_timeout_ms", guardrails.safety_timeout_ms),
        ("guardrails.groundness_timeout_ms", guardrails.groundness_timeout_ms),
    ];
    for (key, budget) in budgets {
        if budget == 0 || budget > 60_000 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=60000")));
        }
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.agent_timeout_minutes == 0 {
        return Err(ConfigError::Validation(
            "conversation.agent_timeout_minutes must be greater than zero".to_string(),
        ));
    }

    if conversation.dedup_window == 0 {
        return Err(ConfigError::Validation(
            "conversation.dedup_window must be greater than zero".to_string(),
        ));
    }

    if conversation.max_conflict_retries == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_conflict_retries must be greater than zero".to_string(),
        ));
    }

    if conversation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        let missing = crm
            .access_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.access_token is not configured (HubSpot private app token)"
                    .to_string(),
            ));
        }
    }

    if crm.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "crm.max_attempts must be greater than zero".to_string(),
        ));
    }

    validate_http_url("crm.base_url", &crm.base_url)
}

fn validate_agent_desk(agent_desk: &AgentDeskConfig) -> Result<(), ConfigError> {
    match &agent_desk.forward_url {
        Some(url) => validate_http_url("agent_desk.forward_url", url),
        None => Ok(()),
    }
}

fn validate_http_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    llm: Option<LlmPatch>,
    guardrails: Option<GuardrailPatch>,
    conversation: Option<ConversationPatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    agent_desk: Option<AgentDeskPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    verify_token: Option<String>,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    api_base_url: Option<String>,
    allowed_senders: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    max_message_chars: Option<usize>,
    min_confidence: Option<f32>,
    pattern_timeout_ms: Option<u64>,
    domain_timeout_ms: Option<u64>,
    safety_timeout_ms: Option<u64>,
    groundness_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    agent_timeout_minutes: Option<u32>,
    dedup_window: Option<usize>,
    max_conflict_retries: Option<u32>,
    extraction_max_retries: Option<u32>,
    extraction_backoff_ms: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    access_token: Option<String>,
    max_attempts: Option<u32>,
    base_retry_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentDeskPatch {
    forward_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadbot_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }
    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let optional = |value: Option<&str>| value.unwrap_or("<unset>").to_string();

    vec![
        Field::new("database.url", "LEADBOT_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "LEADBOT_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "channel.verify_token",
            "LEADBOT_CHANNEL_VERIFY_TOKEN",
            redact_token(&config.channel.verify_token),
        ),
        Field::new(
            "channel.access_token",
            "LEADBOT_CHANNEL_ACCESS_TOKEN",
            redact_token(&config.channel.access_token),
        ),
        Field::new(
            "channel.phone_number_id",
            "LEADBOT_CHANNEL_PHONE_NUMBER_ID",
            &config.channel.phone_number_id,
        ),
        Field::new(
            "channel.allowed_senders",
            "LEADBOT_CHANNEL_ALLOWED_SENDERS",
            if config.channel.allowed_senders.is_empty() {
                "<any>".to_string()
            } else {
                config.channel.allowed_senders.join(",")
            },
        ),
        Field::new("llm.provider", "LEADBOT_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "LEADBOT_LLM_MODEL", &config.llm.model),
        Field::new("llm.base_url", "LEADBOT_LLM_BASE_URL", optional(config.llm.base_url.as_deref())),
        Field::new(
            "llm.api_key",
            "LEADBOT_LLM_API_KEY",
            config.llm.api_key.as_ref().map_or_else(|| "<unset>".to_string(), redact_token),
        ),
        Field::new(
            "guardrails.min_confidence",
            "LEADBOT_GUARDRAILS_MIN_CONFIDENCE",
            config.guardrails.min_confidence.to_string(),
        ),
        Field::new(
            "conversation.agent_timeout_minutes",
            "LEADBOT_CONVERSATION_AGENT_TIMEOUT_MINUTES",
            config.conversation.agent_timeout_minutes.to_string(),
        ),
        Field::new(
            "conversation.dedup_window",
            "LEADBOT_CONVERSATION_DEDUP_WINDOW",
            config.conversation.dedup_window.to_string(),
        ),
        Field::new("server.bind_address", "LEADBOT_SERVER_BIND_ADDRESS", &config.server.bind_address),
        Field::new("server.port", "LEADBOT_SERVER_PORT", config.server.port.to_string()),
        Field::new("crm.enabled", "LEADBOT_CRM_ENABLED", config.crm.enabled.to_string()),
        Field::new(
            "crm.access_token",
            "LEADBOT_CRM_ACCESS_TOKEN",
            config.crm.access_token.as_ref().map_or_else(|| "<unset>".to_string(), redact_token),
        ),
        Field::new(
            "agent_desk.forward_url",
            "LEADBOT_AGENT_DESK_FORWARD_URL",
            optional(config.agent_desk.forward_url.as_deref()),
        ),
        Field::new("logging.level", "LEADBOT_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "LEADBOT_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("leadbot.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/leadbot.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a short prefix so operators can tell tokens apart.
fn redact_token(token: &SecretString) -> String {
    let trimmed = token.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }
    if trimmed.len() > 12 {
        let prefix: String = trimmed.chars().take(4).collect();
        return format!("{prefix}***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn tokens_are_never_rendered_in_full() {
        let token = |raw: &str| SecretString::from(raw.to_string());

        assert_eq!(redact_token(&token("pat-na1-3f2c9d")), "pat-***");
        assert_eq!(redact_token(&token("EAAGm0PX4ZCpsBAKZBqz")), "EAAG***");
        assert_eq!(redact_token(&token("short")), "<redacted>");
        assert_eq!(redact_token(&token("  ")), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_config_file() {
        let doc: Value = "[channel]\nphone_number_id = \"106540352242922\"\n"
            .parse()
            .expect("toml");

        assert!(contains_path(&doc, "channel.phone_number_id"));
        assert!(!contains_path(&doc, "channel.verify_token"));
    }
}

use std::env;
use std::sync::{Mutex, OnceLock};

use leadbot_cli::commands::conversations::{self, ConversationQuery};
use leadbot_cli::commands::{config, doctor, migrate};
use serde_json::Value;

const CHANNEL_ENV: [(&str, &str); 3] = [
    ("LEADBOT_CHANNEL_VERIFY_TOKEN", "verify-me"),
    ("LEADBOT_CHANNEL_ACCESS_TOKEN", "EAAGm0PX4ZCpsBAKZBqz"),
    ("LEADBOT_CHANNEL_PHONE_NUMBER_ID", "106540352242922"),
];

fn valid_env(database_url: &str) -> Vec<(&'static str, String)> {
    let mut vars: Vec<(&'static str, String)> =
        CHANNEL_ENV.iter().map(|(key, value)| (*key, (*value).to_string())).collect();
    vars.push(("LEADBOT_DATABASE_URL", database_url.to_string()));
    vars
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&valid_env("sqlite::memory:"), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_channel_credentials() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("channel."));
    });
}

#[test]
fn conversations_recent_reads_a_migrated_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("leadbot.db").display());

    with_env(&valid_env(&url), || {
        assert_eq!(migrate::run().exit_code, 0, "migrate should prepare the database");

        let result = conversations::run(ConversationQuery::Recent { limit: 5 });
        assert_eq!(result.exit_code, 0, "expected conversation listing to succeed");
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "conversations");
        assert_eq!(payload["message"], "0 conversation(s)");

        let missing =
            conversations::run(ConversationQuery::Show { user_id: "5213312345678".to_string() });
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

#[test]
fn config_output_redacts_channel_tokens() {
    with_env(&valid_env("sqlite::memory:"), || {
        let output = config::run();

        assert!(output.contains(
            "- channel.access_token = EAAG*** (source: env (LEADBOT_CHANNEL_ACCESS_TOKEN))"
        ));
        assert!(!output.contains("EAAGm0PX4ZCpsBAKZBqz"));
        assert!(!output.contains("verify-me"));
        assert!(output.contains("- crm.enabled = false (source: default)"));
    });
}

#[test]
fn doctor_reports_skipped_checks_when_config_is_invalid() {
    with_env(&[], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");

        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["name"], "config_validation");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][2]["status"], "skipped");
    });
}

#[test]
fn doctor_passes_with_valid_env() {
    with_env(&valid_env("sqlite::memory:"), || {
        let output = doctor::run(false);

        assert!(output.starts_with("doctor: all readiness checks passed"), "{output}");
        assert!(output.contains("- [ok] integrations: whatsapp phone number id 106540352242922"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&'static str, String)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADBOT_DATABASE_URL",
        "LEADBOT_DATABASE_MAX_CONNECTIONS",
        "LEADBOT_DATABASE_TIMEOUT_SECS",
        "LEADBOT_CHANNEL_VERIFY_TOKEN",
        "LEADBOT_CHANNEL_ACCESS_TOKEN",
        "LEADBOT_CHANNEL_PHONE_NUMBER_ID",
        "LEADBOT_CHANNEL_ALLOWED_SENDERS",
        "LEADBOT_LLM_PROVIDER",
        "LEADBOT_LLM_API_KEY",
        "LEADBOT_LLM_BASE_URL",
        "LEADBOT_LLM_MODEL",
        "LEADBOT_CRM_ENABLED",
        "LEADBOT_CRM_ACCESS_TOKEN",
        "LEADBOT_AGENT_DESK_FORWARD_URL",
        "LEADBOT_SERVER_PORT",
        "LEADBOT_LOGGING_LEVEL",
        "LEADBOT_LOGGING_FORMAT",
        "LEADBOT_LOG_LEVEL",
        "LEADBOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

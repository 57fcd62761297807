use leadbot_core::config::{AppConfig, LoadOptions};
use leadbot_core::domain::conversation::{Conversation, UserId};
use leadbot_core::slots;
use leadbot_db::{
    connect_with_config, ConversationRepository, CrmSyncLogRepository, RepositoryError,
    SqlConversationRepository, SqlCrmSyncLogRepository, SqlTranscriptRepository,
    TranscriptRepository,
};

use crate::commands::CommandResult;

const COMMAND: &str = "conversations";
const TRANSCRIPT_LINES: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationQuery {
    Recent { limit: u32 },
    Show { user_id: String },
}

pub fn run(query: ConversationQuery) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let conversations = SqlConversationRepository::new(pool.clone());
        let sync_log = SqlCrmSyncLogRepository::new(pool.clone());
        let transcript = SqlTranscriptRepository::new(pool.clone());

        let rendered = match &query {
            ConversationQuery::Recent { limit } => render_recent(&conversations, *limit).await,
            ConversationQuery::Show { user_id } => {
                render_one(&conversations, &sync_log, &transcript, &UserId(user_id.clone())).await
            }
        };
        pool.close().await;
        rendered.map_err(|error| ("query", error.to_string(), 5u8))
    });

    match result {
        Ok(Some(message)) => CommandResult::success(COMMAND, message),
        Ok(None) => CommandResult::failure(COMMAND, "not_found", "no conversation for that user", 6),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

/// One line per conversation, most recent activity first.
pub async fn render_recent(
    repository: &dyn ConversationRepository,
    limit: u32,
) -> Result<Option<String>, RepositoryError> {
    let conversations = repository.list_recent(limit).await?;
    let mut lines = vec![format!("{} conversation(s)", conversations.len())];
    lines.extend(conversations.iter().map(summary_line));
    Ok(Some(lines.join("\n")))
}

pub async fn render_one(
    repository: &dyn ConversationRepository,
    sync_log: &dyn CrmSyncLogRepository,
    transcript: &dyn TranscriptRepository,
    user_id: &UserId,
) -> Result<Option<String>, RepositoryError> {
    let Some(conversation) = repository.find(user_id).await? else {
        return Ok(None);
    };

    let mut lines = vec![summary_line(&conversation)];
    if let Some(slot) = conversation.last_asked_slot {
        lines.push(format!("  last asked: {slot}"));
    }
    if let Some(deadline) = conversation.agent_deadline {
        lines.push(format!("  agent deadline: {}", deadline.to_rfc3339()));
    }
    lines.push("  lead:".to_string());
    for (key, value) in conversation.lead.flatten() {
        lines.push(format!("    {key} = {value}"));
    }
    let missing = slots::missing_required(&conversation.lead);
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        lines.push(format!("  missing: {}", names.join(", ")));
    }

    let attempts = sync_log.list_for_user(user_id).await?;
    if !attempts.is_empty() {
        lines.push("  crm sync:".to_string());
        for attempt in attempts {
            lines.push(format!(
                "    v{} attempt {} {}{}",
                attempt.conversation_version,
                attempt.attempt,
                attempt.status.as_str(),
                attempt.error_message.map(|error| format!(" ({error})")).unwrap_or_default()
            ));
        }
    }

    let entries = transcript.list_for_user(user_id, TRANSCRIPT_LINES).await?;
    if !entries.is_empty() {
        lines.push(format!("  transcript (last {}):", entries.len()));
        for entry in entries {
            lines.push(format!(
                "    {} {}: {}{}",
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                entry.speaker.as_str(),
                entry.text.replace('\n', " / "),
                entry.flagged.map(|category| format!(" [refused: {category}]")).unwrap_or_default()
            ));
        }
    }
    Ok(Some(lines.join("\n")))
}

fn summary_line(conversation: &Conversation) -> String {
    format!(
        "- {} v{} mode={} complete={} missing={} last_activity={}",
        conversation.user_id,
        conversation.version,
        conversation.mode.as_str(),
        slots::is_complete(&conversation.lead),
        slots::missing_required(&conversation.lead).len(),
        conversation.last_activity_at.to_rfc3339()
    )
}

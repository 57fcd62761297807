use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use leadbot_agent::ConversationRuntime;

/// Periodically returns expired agent sessions to the bot.
pub fn spawn(runtime: Arc<ConversationRuntime>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match runtime.sweep(Utc::now()).await {
                Ok(reverted) => {
                    debug!(event_name = "conversation.sweep.tick", reverted, "timeout sweep ran")
                }
                Err(sweep_error) => error!(
                    event_name = "conversation.sweep.failed",
                    error = %sweep_error,
                    "timeout sweep failed"
                ),
            }
        }
    })
}

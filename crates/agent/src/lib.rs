//! Conversation brain of the lead bot.
//!
//! Each inbound message goes through a fixed loop:
//! 1. **Commands** (`commands`) - `reset`, `status` and the escalation keyword
//! 2. **Guardrails** (`guardrails`) - ordered stages that can reject the text
//! 3. **Slot filling** (`slot_filling`, `extraction`) - model extraction merged
//!    into the lead under registry validation
//! 4. **Reply** (`replies`, `inventory`) - next question, summary or answer
//!
//! `runtime::ConversationRuntime` runs that loop against the persisted
//! conversation with optimistic concurrency.
//!
//! # Safety Principle
//!
//! The model only proposes candidate values. Whether a value is accepted,
//! which question comes next and when a lead is complete are decided by the
//! slot registry and the flow engine in `leadbot-core`.

pub mod commands;
pub mod extraction;
pub mod guardrails;
pub mod inventory;
pub mod llm;
pub mod replies;
pub mod runtime;
pub mod slot_filling;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use runtime::{
    AgentForward, ConversationRuntime, RuntimeSettings, TurnDisposition, TurnError, TurnOutcome,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadbot_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use leadbot_core::config::AppConfig;
use leadbot_core::domain::conversation::{Conversation, InboundMessage, UserId};
use leadbot_core::domain::crm::CrmSyncRequest;
use leadbot_core::domain::transcript::{Speaker, TranscriptEntry};
use leadbot_core::errors::{ApplicationError, DomainError};
use leadbot_core::flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowState, FlowTransitionError,
    LeadQualificationFlow, TransitionOutcome,
};
use leadbot_core::slots;
use leadbot_db::{ConversationRepository, RepositoryError, TranscriptRepository};

use crate::commands::Command;
use crate::guardrails::{GuardrailContext, GuardrailPipeline, RejectCategory, Verdict};
use crate::inventory::Inventory;
use crate::replies;
use crate::slot_filling::{FillOutcome, NextStep, SlotFillingEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_message_chars: usize,
    pub agent_timeout: Duration,
    pub dedup_window: usize,
    pub max_conflict_retries: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_message_chars: 1000,
            agent_timeout: Duration::minutes(30),
            dedup_window: leadbot_core::domain::conversation::DEFAULT_DEDUP_WINDOW,
            max_conflict_retries: 3,
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_message_chars: config.guardrails.max_message_chars,
            agent_timeout: Duration::minutes(i64::from(config.conversation.agent_timeout_minutes)),
            dedup_window: config.conversation.dedup_window,
            max_conflict_retries: config.conversation.max_conflict_retries,
        }
    }
}

/// Message handed to the human agent desk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentForward {
    pub user_id: UserId,
    pub text: String,
    pub lead_fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnDisposition {
    Duplicate,
    Rejected { category: RejectCategory, stage: &'static str },
    Command(Command),
    ForwardedToAgent,
    RelayedToUser,
    Escalated,
    Collecting,
    InventoryAnswered,
    Fallback,
    Completed,
    Corrected,
    AlreadyComplete,
}

/// Everything the channel layer has to do after a committed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub user_id: UserId,
    pub reply: Option<String>,
    pub escalate: bool,
    pub forward_to_agent: Option<AgentForward>,
    pub crm_sync: Option<CrmSyncRequest>,
    pub disposition: TurnDisposition,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("conversation `{user_id}` kept changing concurrently; gave up after {attempts} attempts")]
    Conflict { user_id: UserId, attempts: u32 },
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Invalid(domain) => Self::Domain(domain),
            TurnError::Flow(flow) => Self::Domain(DomainError::FlowTransition(flow)),
            TurnError::Repository(repository) => Self::Persistence(repository.to_string()),
            conflict @ TurnError::Conflict { .. } => Self::StateConflict(conflict.to_string()),
        }
    }
}

struct Turn {
    reply: Option<String>,
    escalate: bool,
    forward_to_agent: Option<AgentForward>,
    sync_crm: bool,
    disposition: TurnDisposition,
}

impl Turn {
    fn reply(text: impl Into<String>, disposition: TurnDisposition) -> Self {
        Self {
            reply: Some(text.into()),
            escalate: false,
            forward_to_agent: None,
            sync_crm: false,
            disposition,
        }
    }

    fn silent(disposition: TurnDisposition) -> Self {
        Self { reply: None, escalate: false, forward_to_agent: None, sync_crm: false, disposition }
    }

    fn into_outcome(self, conversation: &Conversation) -> TurnOutcome {
        TurnOutcome {
            user_id: conversation.user_id.clone(),
            reply: self.reply,
            escalate: self.escalate,
            forward_to_agent: self.forward_to_agent,
            crm_sync: self.sync_crm.then(|| CrmSyncRequest::from_conversation(conversation)),
            disposition: self.disposition,
        }
    }
}

/// Drives one conversation turn: load, decide, persist with a version check,
/// retry the whole cycle when another writer got there first.
pub struct ConversationRuntime {
    repository: Arc<dyn ConversationRepository>,
    transcript: Option<Arc<dyn TranscriptRepository>>,
    guardrails: GuardrailPipeline,
    slot_filling: SlotFillingEngine,
    inventory: Inventory,
    flow: FlowEngine<LeadQualificationFlow>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl ConversationRuntime {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        guardrails: GuardrailPipeline,
        slot_filling: SlotFillingEngine,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            repository,
            transcript: None,
            guardrails,
            slot_filling,
            inventory: Inventory::default(),
            flow: FlowEngine::default(),
            audit: Arc::new(NoopAuditSink),
            settings,
        }
    }

    pub fn with_inventory(mut self, inventory: Inventory) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptRepository>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn handle_inbound(
        &self,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        message.validate(self.settings.max_message_chars)?;
        let audit = AuditContext::new(
            Some(message.user_id.0.clone()),
            Some(message.message_id.0.clone()),
            message.message_id.0.clone(),
            "user",
        );

        for attempt in 1..=self.max_attempts() {
            let mut conversation = self.load(&message.user_id, now).await?;
            if conversation.is_duplicate(&message.message_id) {
                debug!(
                    event_name = "conversation.message.duplicate",
                    user_id = %message.user_id,
                    message_id = %message.message_id.0,
                    "duplicate message ignored"
                );
                return Ok(Turn::silent(TurnDisposition::Duplicate).into_outcome(&conversation));
            }

            let first_contact = conversation.is_new();
            let pending_slot = conversation.last_asked_slot;
            conversation.recent_message_ids.remember(&message.message_id);

            let turn =
                self.process_user_message(&mut conversation, &message, first_contact, now, &audit).await?;
            if !matches!(turn.disposition, TurnDisposition::Rejected { .. }) {
                conversation.last_activity_at = now;
            }
            if self.commit(&mut conversation, attempt).await? {
                info!(
                    event_name = "conversation.turn.committed",
                    correlation_id = %audit.correlation_id,
                    user_id = %conversation.user_id,
                    message_id = %message.message_id.0,
                    version = conversation.version,
                    disposition = ?turn.disposition,
                    "conversation turn committed"
                );
                let lines = turn_transcript(&conversation, &message, pending_slot, &turn, now);
                self.record(&conversation.user_id, &lines).await;
                return Ok(turn.into_outcome(&conversation));
            }
        }

        Err(self.gave_up(&message.user_id))
    }

    /// Relays a human agent's message to the user and keeps the conversation
    /// in agent mode.
    pub async fn handle_agent_message(
        &self,
        user_id: &UserId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let audit = self.system_context(user_id, "agent");
        for attempt in 1..=self.max_attempts() {
            let mut conversation = self.load(user_id, now).await?;
            let outcome = self.transition(&conversation, FlowEvent::AgentMessage, now, &audit)?;
            if outcome.requires(&FlowAction::ArmAgentDeadline) {
                conversation.arm_agent_deadline(now, self.settings.agent_timeout);
            }
            conversation.last_activity_at = now;

            let turn = Turn::reply(text, TurnDisposition::RelayedToUser);
            if self.commit(&mut conversation, attempt).await? {
                info!(
                    event_name = "conversation.agent.relayed",
                    correlation_id = %audit.correlation_id,
                    user_id = %user_id,
                    "agent message relayed to user"
                );
                let line = TranscriptEntry::new(user_id.clone(), Speaker::Agent, text, now);
                self.record(user_id, &[line]).await;
                return Ok(turn.into_outcome(&conversation));
            }
        }
        Err(self.gave_up(user_id))
    }

    /// External escalation signal: hand the conversation to a human.
    pub async fn escalate(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, TurnError> {
        let audit = self.system_context(user_id, "escalation");
        for attempt in 1..=self.max_attempts() {
            let mut conversation = self.load(user_id, now).await?;
            self.sweep_if_elapsed(&mut conversation, now, &audit)?;
            let outcome = self.transition(&conversation, FlowEvent::HandoffRequested, now, &audit)?;
            if outcome.requires(&FlowAction::ArmAgentDeadline) {
                conversation.arm_agent_deadline(now, self.settings.agent_timeout);
            }

            let mut turn = Turn::silent(TurnDisposition::Escalated);
            turn.escalate = true;
            if self.commit(&mut conversation, attempt).await? {
                info!(
                    event_name = "conversation.escalated",
                    correlation_id = %audit.correlation_id,
                    user_id = %user_id,
                    "conversation handed to a human agent"
                );
                return Ok(turn.into_outcome(&conversation));
            }
        }
        Err(self.gave_up(user_id))
    }

    /// Returns expired agent sessions to the bot. Returns how many reverted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, TurnError> {
        let expired = self.repository.list_expired_agent_sessions(now).await?;
        let mut reverted = 0;

        for user_id in expired {
            let audit = self.system_context(&user_id, "sweeper");
            for attempt in 1..=self.max_attempts() {
                let Some(mut conversation) = self.repository.find(&user_id).await? else {
                    break;
                };
                if !self.sweep_if_elapsed(&mut conversation, now, &audit)? {
                    break;
                }
                if self.commit(&mut conversation, attempt).await? {
                    reverted += 1;
                    break;
                }
            }
        }

        if reverted > 0 {
            info!(
                event_name = "conversation.sweep.completed",
                reverted,
                "expired agent sessions returned to the bot"
            );
        }
        Ok(reverted)
    }

    async fn process_user_message(
        &self,
        conversation: &mut Conversation,
        message: &InboundMessage,
        first_contact: bool,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<Turn, TurnError> {
        self.sweep_if_elapsed(conversation, now, audit)?;

        if conversation.flow_state() == FlowState::AgentMode {
            let outcome = self.transition(conversation, FlowEvent::UserMessage, now, audit)?;
            let turn = Turn::silent(TurnDisposition::ForwardedToAgent);
            return Ok(self.apply_handoff_actions(conversation, &outcome, &message.text, now, turn));
        }

        if let Some(command) = Command::parse(&message.text) {
            return self.run_command(conversation, command, message, now, audit);
        }

        let state = conversation.flow_state();
        self.transition(conversation, FlowEvent::UserMessage, now, audit)?;

        let context = GuardrailContext { last_asked_slot: conversation.last_asked_slot };
        let accepted = match self.guardrails.evaluate(&message.text, &context).await {
            Verdict::Accepted(sanitized) => sanitized,
            Verdict::Rejected { category, stage } => {
                warn!(
                    event_name = "guardrail.message.rejected",
                    correlation_id = %audit.correlation_id,
                    user_id = %conversation.user_id,
                    message_id = %message.message_id.0,
                    category = category.as_str(),
                    stage,
                    "message rejected by guardrails"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "guardrail.rejected",
                        AuditCategory::Guardrail,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("category", category.as_str())
                    .with_metadata("stage", stage),
                );
                return Ok(Turn::reply(
                    replies::SAFE_REFUSAL,
                    TurnDisposition::Rejected { category, stage },
                ));
            }
        };

        let greeting = if first_contact { replies::GREETING } else { "" };
        let last_asked = conversation.last_asked_slot;
        let fill = self.slot_filling.fill(&accepted, &conversation.lead, last_asked).await;

        let turn = match fill {
            FillOutcome::InventoryQuestion { pending } => {
                let answer = self.inventory.answer(conversation.lead.machinery_type());
                if state == FlowState::LeadComplete {
                    Turn::reply(answer, TurnDisposition::InventoryAnswered)
                } else {
                    let ask = pending.or_else(|| slots::next_unset(&conversation.lead));
                    conversation.last_asked_slot = ask;
                    let question =
                        ask.map(|slot| replies::question(slot, &conversation.lead)).unwrap_or_default();
                    Turn::reply(
                        replies::compose([greeting, answer.as_str(), question.as_str()]),
                        TurnDisposition::InventoryAnswered,
                    )
                }
            }
            FillOutcome::Fallback { pending } => {
                let pending = if state == FlowState::LeadComplete { None } else { pending };
                conversation.last_asked_slot = pending;
                let fallback = replies::fallback(pending, &conversation.lead);
                Turn::reply(replies::compose([greeting, fallback.as_str()]), TurnDisposition::Fallback)
            }
            FillOutcome::Filled { lead, applied, next } => {
                conversation.lead = lead;
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "slot_filling.applied",
                        AuditCategory::SlotFilling,
                        AuditOutcome::Success,
                    )
                    .with_metadata(
                        "slots",
                        applied.iter().map(|slot| slot.key()).collect::<Vec<_>>().join(","),
                    ),
                );

                if state == FlowState::LeadComplete {
                    conversation.last_asked_slot = None;
                    if applied.is_empty() {
                        Turn::reply(replies::ALREADY_COMPLETE, TurnDisposition::AlreadyComplete)
                    } else {
                        let outcome = self.transition(conversation, FlowEvent::LeadCorrected, now, audit)?;
                        let mut turn =
                            Turn::reply(replies::correction_ack(), TurnDisposition::Corrected);
                        turn.sync_crm = outcome.requires(&FlowAction::SyncCrm);
                        turn
                    }
                } else {
                    match next {
                        NextStep::Ask(slot) => {
                            conversation.last_asked_slot = Some(slot);
                            let ack = replies::acknowledgement(&applied, &conversation.lead)
                                .unwrap_or_default();
                            let question = replies::question(slot, &conversation.lead);
                            Turn::reply(
                                replies::compose([greeting, ack.as_str(), question.as_str()]),
                                TurnDisposition::Collecting,
                            )
                        }
                        NextStep::Complete => {
                            let outcome = self.flow.apply_with_audit(
                                &state,
                                &FlowEvent::LeadCompleted,
                                &self.context(conversation, now),
                                self.audit.as_ref(),
                                audit,
                            )?;
                            conversation.last_asked_slot = None;
                            let summary = replies::completion_summary(&conversation.lead);
                            let mut turn = Turn::reply(
                                replies::compose([greeting, summary.as_str()]),
                                TurnDisposition::Completed,
                            );
                            turn.sync_crm = outcome.requires(&FlowAction::SyncCrm);
                            turn
                        }
                    }
                }
            }
        };
        Ok(turn)
    }

    fn run_command(
        &self,
        conversation: &mut Conversation,
        command: Command,
        message: &InboundMessage,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<Turn, TurnError> {
        info!(
            event_name = "conversation.command",
            correlation_id = %audit.correlation_id,
            user_id = %conversation.user_id,
            command = command.as_str(),
            "command received"
        );
        let disposition = TurnDisposition::Command(command);
        match command {
            Command::Reset => {
                let outcome = self.transition(conversation, FlowEvent::ResetRequested, now, audit)?;
                if outcome.requires(&FlowAction::ResetLead) {
                    conversation.reset_lead();
                }
                Ok(Turn::reply(replies::RESET_CONFIRMATION, disposition))
            }
            Command::Status => {
                self.transition(conversation, FlowEvent::StatusRequested, now, audit)?;
                Ok(Turn::reply(replies::status_snapshot(&conversation.lead), disposition))
            }
            Command::Handoff => {
                let outcome = self.transition(conversation, FlowEvent::HandoffRequested, now, audit)?;
                let mut turn = Turn::reply(replies::HANDOFF_ACK, disposition);
                turn.escalate = true;
                Ok(self.apply_handoff_actions(conversation, &outcome, &message.text, now, turn))
            }
        }
    }

    fn apply_handoff_actions(
        &self,
        conversation: &mut Conversation,
        outcome: &TransitionOutcome,
        text: &str,
        now: DateTime<Utc>,
        mut turn: Turn,
    ) -> Turn {
        if outcome.requires(&FlowAction::ArmAgentDeadline) {
            conversation.arm_agent_deadline(now, self.settings.agent_timeout);
        }
        if outcome.requires(&FlowAction::ForwardToAgent) {
            turn.forward_to_agent = Some(AgentForward {
                user_id: conversation.user_id.clone(),
                text: text.to_string(),
                lead_fields: conversation.lead.flatten(),
            });
        }
        turn
    }

    /// Applies the timeout transition when an agent session has expired.
    fn sweep_if_elapsed(
        &self,
        conversation: &mut Conversation,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<bool, TurnError> {
        if conversation.flow_state() != FlowState::AgentMode
            || !conversation.agent_deadline_elapsed(now)
        {
            return Ok(false);
        }
        let outcome = self.transition(conversation, FlowEvent::AgentDeadlineSwept, now, audit)?;
        if outcome.requires(&FlowAction::ClearAgentDeadline) {
            conversation.return_to_bot();
            info!(
                event_name = "conversation.agent.expired",
                correlation_id = %audit.correlation_id,
                user_id = %conversation.user_id,
                "agent deadline elapsed; conversation returned to the bot"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn transition(
        &self,
        conversation: &Conversation,
        event: FlowEvent,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TurnError> {
        Ok(self.flow.apply_with_audit(
            &conversation.flow_state(),
            &event,
            &self.context(conversation, now),
            self.audit.as_ref(),
            audit,
        )?)
    }

    fn context(&self, conversation: &Conversation, now: DateTime<Utc>) -> FlowContext {
        FlowContext {
            missing_required_slots: slots::missing_required(&conversation.lead)
                .into_iter()
                .map(|slot| slot.key().to_string())
                .collect(),
            agent_deadline_elapsed: conversation.agent_deadline_elapsed(now),
        }
    }

    async fn load(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Conversation, TurnError> {
        Ok(self
            .repository
            .find(user_id)
            .await?
            .unwrap_or_else(|| Conversation::new(user_id.clone(), now, self.settings.dedup_window)))
    }

    /// Writes the conversation. `Ok(false)` means another writer won and the
    /// caller should rerun the turn against fresh state.
    async fn commit(&self, conversation: &mut Conversation, attempt: u32) -> Result<bool, TurnError> {
        match self.repository.save(conversation).await {
            Ok(version) => {
                conversation.version = version;
                Ok(true)
            }
            Err(error) if error.is_conflict() => {
                warn!(
                    event_name = "conversation.save.conflict",
                    user_id = %conversation.user_id,
                    attempt,
                    max_attempts = self.max_attempts(),
                    "concurrent update detected; retrying turn"
                );
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Transcript writes follow a committed turn; a failure is logged and the
    /// turn still stands.
    async fn record(&self, user_id: &UserId, lines: &[TranscriptEntry]) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        if let Err(error) = transcript.append(lines).await {
            warn!(
                event_name = "conversation.transcript.write_failed",
                user_id = %user_id,
                entries = lines.len(),
                error = %error,
                "transcript entries were not stored"
            );
        }
    }

    fn max_attempts(&self) -> u32 {
        self.settings.max_conflict_retries + 1
    }

    fn gave_up(&self, user_id: &UserId) -> TurnError {
        TurnError::Conflict { user_id: user_id.clone(), attempts: self.max_attempts() }
    }

    fn system_context(&self, user_id: &UserId, actor: &str) -> AuditContext {
        AuditContext::new(Some(user_id.0.clone()), None, Uuid::new_v4().to_string(), actor)
    }
}

fn turn_transcript(
    conversation: &Conversation,
    message: &InboundMessage,
    pending_slot: Option<slots::SlotId>,
    turn: &Turn,
    now: DateTime<Utc>,
) -> Vec<TranscriptEntry> {
    let user_id = &conversation.user_id;
    let mut inbound = TranscriptEntry::new(user_id.clone(), Speaker::Lead, &message.text, now)
        .with_message_id(message.message_id.clone())
        .with_asked_slot(pending_slot);
    if let TurnDisposition::Rejected { category, .. } = &turn.disposition {
        inbound = inbound.flagged(category.as_str());
    }

    let mut lines = vec![inbound];
    if let Some(reply) = &turn.reply {
        lines.push(
            TranscriptEntry::new(user_id.clone(), Speaker::Bot, reply, now)
                .with_asked_slot(conversation.last_asked_slot),
        );
    }
    lines
}

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct LeadQualificationFlow;

impl FlowDefinition for LeadQualificationFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::BotCollecting
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_lead_qualification(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<LeadQualificationFlow> {
    fn default() -> Self {
        Self::new(LeadQualificationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots before transition from {state:?}: {missing_slots:?}")]
    MissingRequiredSlots { state: FlowState, missing_slots: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_lead_qualification(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        ArmAgentDeadline, ClearAgentDeadline, EvaluateGuardrails, FillSlots, ForwardToAgent,
        RelayToUser, ReplyStatus, ResetLead, SyncCrm,
    };
    use FlowEvent::{
        AgentDeadlineSwept, AgentMessage, HandoffRequested, LeadCompleted, LeadCorrected,
        ResetRequested, StatusRequested, UserMessage,
    };
    use FlowState::{AgentMode, BotCollecting, LeadComplete};

    let bot_state =
        if context.missing_required_slots.is_empty() { LeadComplete } else { BotCollecting };

    let (to, actions) = match (current, event) {
        (BotCollecting | LeadComplete, UserMessage) => {
            (*current, vec![EvaluateGuardrails, FillSlots])
        }
        (AgentMode, UserMessage) => (AgentMode, vec![ArmAgentDeadline, ForwardToAgent]),
        (BotCollecting | LeadComplete, ResetRequested) => (BotCollecting, vec![ResetLead]),
        (BotCollecting | LeadComplete, StatusRequested) => (*current, vec![ReplyStatus]),
        (BotCollecting | LeadComplete, HandoffRequested) => {
            (AgentMode, vec![ArmAgentDeadline, ForwardToAgent])
        }
        (AgentMode, HandoffRequested) => (AgentMode, vec![ArmAgentDeadline]),
        (_, AgentMessage) => (AgentMode, vec![ArmAgentDeadline, RelayToUser]),
        (AgentMode, AgentDeadlineSwept) if context.agent_deadline_elapsed => {
            (bot_state, vec![ClearAgentDeadline])
        }
        (AgentMode, AgentDeadlineSwept) => (AgentMode, Vec::new()),
        (BotCollecting, LeadCompleted) => {
            if !context.missing_required_slots.is_empty() {
                return Err(FlowTransitionError::MissingRequiredSlots {
                    state: *current,
                    missing_slots: context.missing_required_slots.clone(),
                });
            }
            (LeadComplete, vec![SyncCrm])
        }
        (LeadComplete, LeadCorrected) => (LeadComplete, vec![SyncCrm]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{FlowEngine, FlowTransitionError, LeadQualificationFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState};

    fn incomplete() -> FlowContext {
        FlowContext { missing_required_slots: vec!["phone".to_owned()], ..FlowContext::default() }
    }

    #[test]
    fn user_message_in_bot_mode_runs_guardrails_then_slot_filling() {
        let engine = FlowEngine::new(LeadQualificationFlow);
        let outcome = engine
            .apply(&engine.initial_state(), &FlowEvent::UserMessage, &incomplete())
            .expect("bot message");

        assert_eq!(outcome.to, FlowState::BotCollecting);
        assert_eq!(outcome.actions, vec![FlowAction::EvaluateGuardrails, FlowAction::FillSlots]);
    }

    #[test]
    fn user_message_in_agent_mode_is_forwarded_without_slot_filling() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::AgentMode, &FlowEvent::UserMessage, &incomplete())
            .expect("agent message");

        assert_eq!(outcome.to, FlowState::AgentMode);
        assert!(outcome.requires(&FlowAction::ForwardToAgent));
        assert!(outcome.requires(&FlowAction::ArmAgentDeadline));
        assert!(!outcome.requires(&FlowAction::FillSlots));
    }

    #[test]
    fn completion_requires_all_slots_and_triggers_crm_sync() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::BotCollecting, &FlowEvent::LeadCompleted, &incomplete())
            .expect_err("missing slots");
        assert!(matches!(error, FlowTransitionError::MissingRequiredSlots { .. }));

        let outcome = engine
            .apply(&FlowState::BotCollecting, &FlowEvent::LeadCompleted, &FlowContext::default())
            .expect("complete");
        assert_eq!(outcome.to, FlowState::LeadComplete);
        assert_eq!(outcome.actions, vec![FlowAction::SyncCrm]);
    }

    #[test]
    fn reset_from_complete_returns_to_collecting_without_sync() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&FlowState::LeadComplete, &FlowEvent::ResetRequested, &FlowContext::default())
            .expect("reset");

        assert_eq!(outcome.to, FlowState::BotCollecting);
        assert_eq!(outcome.actions, vec![FlowAction::ResetLead]);
    }

    #[test]
    fn sweep_only_reverts_after_deadline() {
        let engine = FlowEngine::default();
        let pending = engine
            .apply(&FlowState::AgentMode, &FlowEvent::AgentDeadlineSwept, &incomplete())
            .expect("sweep before deadline");
        assert_eq!(pending.to, FlowState::AgentMode);
        assert!(pending.actions.is_empty());

        let expired = engine
            .apply(
                &FlowState::AgentMode,
                &FlowEvent::AgentDeadlineSwept,
                &FlowContext { agent_deadline_elapsed: true, ..incomplete() },
            )
            .expect("sweep after deadline");
        assert_eq!(expired.to, FlowState::BotCollecting);
        assert_eq!(expired.actions, vec![FlowAction::ClearAgentDeadline]);

        let complete = engine
            .apply(
                &FlowState::AgentMode,
                &FlowEvent::AgentDeadlineSwept,
                &FlowContext { agent_deadline_elapsed: true, ..FlowContext::default() },
            )
            .expect("sweep complete lead");
        assert_eq!(complete.to, FlowState::LeadComplete);
    }

    #[test]
    fn commands_are_not_valid_in_agent_mode() {
        let engine = FlowEngine::default();
        for event in [FlowEvent::ResetRequested, FlowEvent::StatusRequested] {
            let error = engine
                .apply(&FlowState::AgentMode, &event, &FlowContext::default())
                .expect_err("commands are bot-only");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn agent_message_enters_agent_mode_from_any_state() {
        let engine = FlowEngine::default();
        for state in [FlowState::BotCollecting, FlowState::LeadComplete, FlowState::AgentMode] {
            let outcome = engine
                .apply(&state, &FlowEvent::AgentMessage, &FlowContext::default())
                .expect("agent message");
            assert_eq!(outcome.to, FlowState::AgentMode);
            assert_eq!(outcome.actions, vec![FlowAction::ArmAgentDeadline, FlowAction::RelayToUser]);
        }
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::default();
        let events = [
            FlowEvent::UserMessage,
            FlowEvent::HandoffRequested,
            FlowEvent::UserMessage,
            FlowEvent::AgentDeadlineSwept,
        ];
        let context = FlowContext { agent_deadline_elapsed: true, ..incomplete() };

        let run = |engine: &FlowEngine<LeadQualificationFlow>| {
            let mut state = engine.initial_state();
            let mut actions = Vec::new();
            for event in &events {
                let outcome = engine.apply(&state, event, &context).expect("deterministic run");
                actions.push(outcome.actions);
                state = outcome.to;
            }
            (state, actions)
        };

        let first = run(&engine);
        let second = run(&engine);
        assert_eq!(first, second);
        assert_eq!(first.0, FlowState::BotCollecting);
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::BotCollecting,
                &FlowEvent::HandoffRequested,
                &FlowContext::default(),
                &sink,
                &AuditContext::new(Some("5213312345678".to_owned()), Some("wamid.9".to_owned()), "req-42", "runtime"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].message_id.as_deref(), Some("wamid.9"));
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("AgentMode"));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    BotCollecting,
    /// Bot mode with every required slot answered; corrections still accepted.
    LeadComplete,
    AgentMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    UserMessage,
    ResetRequested,
    StatusRequested,
    HandoffRequested,
    AgentMessage,
    AgentDeadlineSwept,
    LeadCompleted,
    LeadCorrected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_slots: Vec<String>,
    pub agent_deadline_elapsed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    EvaluateGuardrails,
    FillSlots,
    ResetLead,
    ReplyStatus,
    ArmAgentDeadline,
    ForwardToAgent,
    RelayToUser,
    ClearAgentDeadline,
    SyncCrm,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: &FlowAction) -> bool {
        self.actions.contains(action)
    }
}

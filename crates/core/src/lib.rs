pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod slots;

pub use domain::conversation::{
    Conversation, ConversationMode, InboundMessage, MessageId, RecentMessageIds, UserId,
};
pub use domain::crm::{CrmSyncEvent, CrmSyncRequest, CrmSyncStatus};
pub use domain::lead::{Lead, LeadStatus, TechnicalDetails};
pub use domain::machinery::MachineryType;
pub use domain::value::{Measure, SlotCandidate, SlotInput, SlotStatus, SlotValue, Unit};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowAction, FlowContext, FlowEngine, FlowEvent, FlowState, LeadQualificationFlow};
pub use slots::{SlotDomain, SlotId, SlotSchema, TechnicalSlot};

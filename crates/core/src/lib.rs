pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::chat_log::{ChatExchange, ChatLogError, ChatLogSink};
pub use domain::conversation::{
    ActionRequest, ActionResult, Conversation, ConversationTurn, FailureKind, Role,
};
pub use domain::instance::{
    AttachedVolume, BlockDevice, InstanceDescriptor, InstanceId, InstanceState, KeyPair,
    LaunchRequest, SecurityGroup,
};
pub use domain::provisioning::{
    FollowUpQuestion, ProvisioningSession, ProvisioningSpec, Slot, SlotFragment, SlotOutcome,
};
pub use errors::{DomainError, InterfaceError};
pub use flows::{
    OrchestrationContext, OrchestrationEngine, OrchestrationEvent, OrchestrationState,
    ToolLoopFlow,
};

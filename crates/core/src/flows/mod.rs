pub mod engine;
pub mod states;

pub use engine::{OrchestrationEngine, OrchestrationFlow, OrchestrationTransitionError, ToolLoopFlow};
pub use states::{OrchestrationContext, OrchestrationEvent, OrchestrationState, TransitionOutcome};

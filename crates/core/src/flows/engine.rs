use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    OrchestrationContext, OrchestrationEvent, OrchestrationState, TransitionOutcome,
};

pub trait OrchestrationFlow {
    fn initial_state(&self) -> OrchestrationState;
    fn transition(
        &self,
        current: &OrchestrationState,
        event: &OrchestrationEvent,
        context: &OrchestrationContext,
    ) -> Result<TransitionOutcome, OrchestrationTransitionError>;
}

/// DECIDE and ACT alternate until the decider stops asking for actions
/// or the round-trip budget runs out.
#[derive(Clone, Debug, Default)]
pub struct ToolLoopFlow;

impl OrchestrationFlow for ToolLoopFlow {
    fn initial_state(&self) -> OrchestrationState {
        OrchestrationState::Decide
    }

    fn transition(
        &self,
        current: &OrchestrationState,
        event: &OrchestrationEvent,
        context: &OrchestrationContext,
    ) -> Result<TransitionOutcome, OrchestrationTransitionError> {
        transition_tool_loop(current, event, context)
    }
}

pub struct OrchestrationEngine<F> {
    flow: F,
}

impl<F> OrchestrationEngine<F>
where
    F: OrchestrationFlow,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> OrchestrationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &OrchestrationState,
        event: &OrchestrationEvent,
        context: &OrchestrationContext,
    ) -> Result<TransitionOutcome, OrchestrationTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &OrchestrationState,
        event: &OrchestrationEvent,
        context: &OrchestrationContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, OrchestrationTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "orchestration.transition_applied",
                        AuditCategory::Orchestration,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event))
                    .with_metadata("round_trips", context.round_trips.to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "orchestration.transition_rejected",
                        AuditCategory::Orchestration,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for OrchestrationEngine<ToolLoopFlow> {
    fn default() -> Self {
        Self::new(ToolLoopFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: OrchestrationState, event: OrchestrationEvent },
}

fn transition_tool_loop(
    current: &OrchestrationState,
    event: &OrchestrationEvent,
    context: &OrchestrationContext,
) -> Result<TransitionOutcome, OrchestrationTransitionError> {
    use OrchestrationEvent::{
        ActionsCompleted, DeciderFailed, DecisionWithActions, DecisionWithoutActions,
        GatewayUnavailable,
    };
    use OrchestrationState::{Aborted, Act, Decide, Done, Exhausted};

    let to = match (current, event) {
        (Decide, DecisionWithoutActions) => Done,
        (Decide, DecisionWithActions) if context.budget_spent() => Exhausted,
        (Decide, DecisionWithActions) => Act,
        (Act, ActionsCompleted) => Decide,
        (Decide, DeciderFailed) | (Act, GatewayUnavailable) => Aborted,
        _ => {
            return Err(OrchestrationTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event })
}

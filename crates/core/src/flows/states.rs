use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationState {
    Decide,
    Act,
    Done,
    Exhausted,
    Aborted,
}

impl OrchestrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Exhausted | Self::Aborted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationEvent {
    DecisionWithoutActions,
    DecisionWithActions,
    ActionsCompleted,
    DeciderFailed,
    GatewayUnavailable,
}

/// Round-trip accounting for one top-level request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub round_trips: u32,
    pub max_round_trips: u32,
}

impl OrchestrationContext {
    pub fn new(max_round_trips: u32) -> Self {
        Self { round_trips: 0, max_round_trips }
    }

    pub fn budget_spent(&self) -> bool {
        self.round_trips >= self.max_round_trips
    }
}

impl Default for OrchestrationContext {
    fn default() -> Self {
        Self::new(10)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: OrchestrationState,
    pub to: OrchestrationState,
    pub event: OrchestrationEvent,
}

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use cloudpilot_core::audit::{AuditContext, AuditEvent, AuditSink, NoopAuditSink};
use cloudpilot_core::config::AgentConfig;
use cloudpilot_core::domain::chat_log::{ChatExchange, ChatLogSink};
use cloudpilot_core::domain::conversation::{Conversation, ConversationTurn, FailureKind};
use cloudpilot_core::errors::DomainError;
use cloudpilot_core::flows::{
    OrchestrationContext, OrchestrationEngine, OrchestrationEvent, OrchestrationState,
    OrchestrationTransitionError, ToolLoopFlow,
};

use crate::llm::Decider;
use crate::prompt::{load_system_prompt, PromptError, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{ActionContext, ActionDispatcher};

const AUDIT_ACTOR: &str = "orchestrator";

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("orchestration exhausted after {round_trips} round trips")]
    Exhausted { round_trips: u32 },
    #[error("decider unavailable: {0}")]
    DeciderUnavailable(String),
    #[error("compute gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("request timed out after {secs}s")]
    TimedOut { secs: u64 },
    #[error(transparent)]
    Transition(#[from] OrchestrationTransitionError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl OrchestrationError {
    /// Terminal answer text shown to the user in place of a normal reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::Exhausted { round_trips } => format!(
                "⚠️ Sorry, I couldn't finish that request within {round_trips} steps. \
                 Please try again with a more specific request."
            ),
            Self::DeciderUnavailable(_) => {
                "❌ Error: the assistant is unavailable right now. Please try again later."
                    .to_string()
            }
            Self::GatewayUnavailable(_) => {
                "❌ Error: the cloud provider could not be reached. Please try again later."
                    .to_string()
            }
            Self::TimedOut { secs } => {
                format!("❌ Error: the request took longer than {secs}s and was cancelled.")
            }
            Self::Transition(_) | Self::Domain(_) => {
                "❌ Error: something went wrong while handling your request.".to_string()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub max_round_trips: u32,
    pub request_timeout: Duration,
    pub system_prompt: String,
}

impl RuntimeSettings {
    pub fn from_config(config: &AgentConfig) -> Result<Self, PromptError> {
        Ok(Self {
            max_round_trips: config.max_round_trips,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            system_prompt: load_system_prompt(config.system_prompt_path.as_deref())?,
        })
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_round_trips: 10,
            request_timeout: Duration::from_secs(120),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Drives one DECIDE/ACT loop per top-level request. Shares nothing between
/// requests except what the dispatcher's tools share (the session store).
pub struct AgentRuntime {
    decider: Arc<dyn Decider>,
    dispatcher: ActionDispatcher,
    engine: OrchestrationEngine<ToolLoopFlow>,
    audit_sink: Arc<dyn AuditSink>,
    chat_log: Option<Arc<dyn ChatLogSink>>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        decider: Arc<dyn Decider>,
        dispatcher: ActionDispatcher,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            decider,
            dispatcher,
            engine: OrchestrationEngine::default(),
            audit_sink: Arc::new(NoopAuditSink),
            chat_log: None,
            settings,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn with_chat_log(mut self, sink: Arc<dyn ChatLogSink>) -> Self {
        self.chat_log = Some(sink);
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Answers one chat message. Every failure is folded into answer text, and
    /// the exchange is handed to the chat log without waiting on it.
    pub async fn handle_message(&self, user_id: &str, message: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        let context = ActionContext::new(user_id, &correlation_id);
        info!(
            event_name = "agent.request_received",
            correlation_id = %correlation_id,
            user_id = %user_id,
            "handling chat message"
        );

        let answer = match timeout(self.settings.request_timeout, self.run(&context, message)).await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.request_failed",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    error = %error,
                    "request ended with a terminal error"
                );
                error.user_message()
            }
            Err(_) => {
                let error =
                    OrchestrationError::TimedOut { secs: self.settings.request_timeout.as_secs() };
                warn!(
                    event_name = "agent.request_timed_out",
                    correlation_id = %correlation_id,
                    user_id = %user_id,
                    "request exceeded its wall-clock budget"
                );
                error.user_message()
            }
        };

        self.record_exchange(user_id, message, &answer);
        answer
    }

    pub async fn run(
        &self,
        context: &ActionContext,
        message: &str,
    ) -> Result<String, OrchestrationError> {
        let audit = AuditContext::new(&context.user_id, &context.correlation_id, AUDIT_ACTOR);
        let tools = self.dispatcher.registry().specs();
        let mut conversation = Conversation::seeded(message);
        conversation.ensure_system_prompt(&self.settings.system_prompt);
        let mut progress = OrchestrationContext::new(self.settings.max_round_trips);
        let mut state = self.engine.initial_state();

        loop {
            match state {
                OrchestrationState::Decide => {
                    let turn = match self.decider.decide(conversation.turns(), &tools).await {
                        Ok(turn) => turn,
                        Err(error) => {
                            self.transition(state, OrchestrationEvent::DeciderFailed, &progress, &audit)?;
                            return Err(OrchestrationError::DeciderUnavailable(error.to_string()));
                        }
                    };
                    let event = if turn.has_actions() {
                        OrchestrationEvent::DecisionWithActions
                    } else {
                        OrchestrationEvent::DecisionWithoutActions
                    };
                    state = self.transition(state, event, &progress, &audit)?;
                    if state == OrchestrationState::Exhausted {
                        return Err(OrchestrationError::Exhausted {
                            round_trips: progress.round_trips,
                        });
                    }
                    conversation.push(turn)?;
                }
                OrchestrationState::Act => {
                    let requests = conversation
                        .last()
                        .map(|turn| turn.action_requests.clone())
                        .unwrap_or_default();
                    let results = self.dispatcher.execute(context, &requests).await;
                    for result in &results {
                        conversation.push(ConversationTurn::tool_result(result))?;
                    }
                    progress.round_trips += 1;

                    if let Some(failed) =
                        results.iter().find(|result| result.failure == Some(FailureKind::Unavailable))
                    {
                        self.transition(state, OrchestrationEvent::GatewayUnavailable, &progress, &audit)?;
                        return Err(OrchestrationError::GatewayUnavailable(failed.payload.clone()));
                    }
                    state = self.transition(state, OrchestrationEvent::ActionsCompleted, &progress, &audit)?;
                }
                OrchestrationState::Done => return Ok(conversation.assistant_transcript()),
                OrchestrationState::Exhausted | OrchestrationState::Aborted => {
                    return Err(OrchestrationTransitionError::InvalidTransition {
                        state,
                        event: OrchestrationEvent::ActionsCompleted,
                    }
                    .into());
                }
            }
        }
    }

    fn transition(
        &self,
        state: OrchestrationState,
        event: OrchestrationEvent,
        progress: &OrchestrationContext,
        audit: &AuditContext,
    ) -> Result<OrchestrationState, OrchestrationTransitionError> {
        let outcome =
            self.engine.apply_with_audit(&state, &event, progress, self.audit_sink.as_ref(), audit)?;
        Ok(outcome.to)
    }

    fn record_exchange(&self, user_id: &str, message: &str, answer: &str) {
        let Some(sink) = self.chat_log.clone() else {
            return;
        };
        let exchange = ChatExchange::new(user_id, message, answer);
        tokio::spawn(async move {
            let exchange_id = exchange.id.clone();
            if let Err(error) = sink.record(exchange).await {
                warn!(
                    event_name = "agent.chat_log_failed",
                    exchange_id = %exchange_id,
                    error = %error,
                    "could not persist chat exchange"
                );
            }
        });
    }
}

/// Forwards audit events to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            user_id = %event.user_id,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit"
        );
    }
}

use std::sync::Arc;

use thiserror::Error;

use cloudpilot_core::audit::AuditSink;
use cloudpilot_core::config::AppConfig;
use cloudpilot_gateway::{provider_from_config, ComputeProvider, ProviderError, ResourceGateway};

use crate::conversation::KeywordFragmentExtractor;
use crate::llm::{Decider, DeciderError, OpenAiDecider};
use crate::prompt::PromptError;
use crate::runtime::{AgentRuntime, RuntimeSettings};
use crate::sessions::{SessionStore, SlotFillingSessionManager};
use crate::tools::{ActionDispatcher, ToolRegistry};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("compute provider setup failed: {0}")]
    Compute(#[from] ProviderError),
    #[error("decider setup failed: {0}")]
    Decider(#[from] DeciderError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// A runtime plus the session store it shares with background maintenance.
pub struct AgentStack {
    pub runtime: AgentRuntime,
    pub sessions: Arc<SessionStore>,
}

/// Wires the configured compute backend and decider into a runtime.
pub fn assemble(config: &AppConfig, audit: Arc<dyn AuditSink>) -> Result<AgentStack, AssemblyError> {
    let provider = provider_from_config(&config.compute)?;
    let decider = OpenAiDecider::from_config(&config.llm)?;
    assemble_with(config, provider, Arc::new(decider), audit).map_err(AssemblyError::from)
}

pub fn assemble_with(
    config: &AppConfig,
    provider: Arc<dyn ComputeProvider>,
    decider: Arc<dyn Decider>,
    audit: Arc<dyn AuditSink>,
) -> Result<AgentStack, PromptError> {
    let sessions = Arc::new(SessionStore::default());
    let manager = Arc::new(SlotFillingSessionManager::new(
        sessions.clone(),
        Arc::new(KeywordFragmentExtractor::new()),
        audit.clone(),
    ));
    let registry = ToolRegistry::standard(ResourceGateway::new(provider), manager);
    let runtime = AgentRuntime::new(
        decider,
        ActionDispatcher::new(Arc::new(registry)).with_audit_sink(audit.clone()),
        RuntimeSettings::from_config(&config.agent)?,
    )
    .with_audit_sink(audit);

    Ok(AgentStack { runtime, sessions })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cloudpilot_core::audit::NoopAuditSink;
    use cloudpilot_core::config::{AppConfig, ComputeBackend};

    use super::{assemble, AssemblyError};

    #[test]
    fn default_config_exposes_all_operations() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-test".to_string().into());
        config.agent.max_round_trips = 4;

        let stack = assemble(&config, Arc::new(NoopAuditSink)).expect("assemble");

        assert_eq!(stack.runtime.settings().max_round_trips, 4);
        assert_eq!(
            stack.runtime.dispatcher().registry().names(),
            vec![
                "create_instance",
                "describe_instance",
                "list_instances",
                "list_key_pairs",
                "list_security_groups",
                "list_volume_types",
                "start_instance",
                "stop_instance",
            ]
        );
    }

    #[test]
    fn http_backend_without_endpoint_is_rejected() {
        let mut config = AppConfig::default();
        config.compute.backend = ComputeBackend::Http;

        let result = assemble(&config, Arc::new(NoopAuditSink));
        assert!(matches!(result, Err(AssemblyError::Compute(_))));
    }
}

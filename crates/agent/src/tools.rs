use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use cloudpilot_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use cloudpilot_core::domain::conversation::{ActionRequest, ActionResult, FailureKind};
use cloudpilot_gateway::{ProviderError, ResourceGateway};

use crate::sessions::{ProvisionOutcome, SlotFillingSessionManager};

/// Who is acting and which request this is; never taken from decider output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionContext {
    pub user_id: String,
    pub correlation_id: String,
}

impl ActionContext {
    pub fn new(user_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), correlation_id: correlation_id.into() }
    }
}

/// Operation advertised to the decider.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),
    /// Refusal already phrased for the user.
    #[error("{0}")]
    Refused(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{message}")]
    Unavailable { message: String },
}

impl ToolError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } => FailureKind::Unavailable,
            Self::Provider(error) if error.is_unavailable() => FailureKind::Unavailable,
            _ => FailureKind::Recoverable,
        }
    }

    fn user_text(&self, operation: &str) -> String {
        match self {
            Self::Refused(message) | Self::Unavailable { message } => message.clone(),
            Self::MissingArgument(name) => {
                format!("❌ `{operation}` needs the `{name}` argument.")
            }
            Self::Provider(error) => format!("❌ Error running {operation}: {error}"),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }
    async fn execute(
        &self,
        context: &ActionContext,
        request: &ActionRequest,
    ) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// The eight supported resource operations.
    pub fn standard(gateway: ResourceGateway, sessions: Arc<SlotFillingSessionManager>) -> Self {
        let mut registry = Self::default();
        registry.register(ListInstancesTool { gateway: gateway.clone() });
        registry.register(DescribeInstanceTool { gateway: gateway.clone() });
        registry.register(StartInstanceTool { gateway: gateway.clone() });
        registry.register(StopInstanceTool { gateway: gateway.clone() });
        registry.register(CreateInstanceTool { gateway: gateway.clone(), sessions });
        registry.register(ListSecurityGroupsTool { gateway: gateway.clone() });
        registry.register(ListKeyPairsTool { gateway: gateway.clone() });
        registry.register(ListVolumeTypesTool { gateway });
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.tools.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect::<Vec<_>>();
        specs.sort_by(|left, right| left.name.cmp(&right.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Runs one batch of action requests. Always returns one result per request,
/// in request order.
#[derive(Clone)]
pub struct ActionDispatcher {
    registry: Arc<ToolRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        context: &ActionContext,
        requests: &[ActionRequest],
    ) -> Vec<ActionResult> {
        join_all(requests.iter().map(|request| self.execute_one(context, request))).await
    }

    async fn execute_one(&self, context: &ActionContext, request: &ActionRequest) -> ActionResult {
        let result = self.run_tool(context, request).await;
        let outcome = match result.failure {
            None => AuditOutcome::Success,
            Some(FailureKind::Recoverable) => AuditOutcome::Rejected,
            Some(FailureKind::Unavailable) => AuditOutcome::Failed,
        };
        self.audit.emit(
            AuditEvent::new(
                &AuditContext::new(&context.user_id, &context.correlation_id, "dispatcher"),
                "dispatch.action_completed",
                AuditCategory::Gateway,
                outcome,
            )
            .with_metadata("operation", request.operation.clone())
            .with_metadata("call_id", request.correlation_id.clone()),
        );
        result
    }

    async fn run_tool(&self, context: &ActionContext, request: &ActionRequest) -> ActionResult {
        let Some(tool) = self.registry.get(&request.operation) else {
            warn!(
                event_name = "dispatch.unknown_operation",
                correlation_id = %context.correlation_id,
                operation = %request.operation,
                "decider requested an unsupported operation"
            );
            return ActionResult::failure(
                request,
                FailureKind::Recoverable,
                format!(
                    "❌ Unknown operation `{}`. Supported operations: {}.",
                    request.operation,
                    self.registry.names().join(", ")
                ),
            );
        };

        debug!(
            event_name = "dispatch.action_started",
            correlation_id = %context.correlation_id,
            operation = %request.operation,
            call_id = %request.correlation_id,
            "executing action"
        );
        match tool.execute(context, request).await {
            Ok(text) => ActionResult::success(request, text),
            Err(error) => {
                warn!(
                    event_name = "dispatch.action_failed",
                    correlation_id = %context.correlation_id,
                    operation = %request.operation,
                    error = %error,
                    "action failed"
                );
                ActionResult::failure(request, error.failure_kind(), error.user_text(&request.operation))
            }
        }
    }
}

fn identifier_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "identifier": {
                "type": "string",
                "description": "Instance ID, Name tag, private IP or public IP"
            }
        },
        "required": ["identifier"]
    })
}

fn identifier(request: &ActionRequest) -> Result<&str, ToolError> {
    request
        .str_argument("identifier")
        .filter(|value| !value.trim().is_empty())
        .ok_or(ToolError::MissingArgument("identifier"))
}

struct ListInstancesTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for ListInstancesTool {
    fn name(&self) -> &'static str {
        "list_instances"
    }

    fn description(&self) -> &'static str {
        "Lists all instances with name, ID, state, private and public IPs."
    }

    async fn execute(&self, _: &ActionContext, _: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.list_instances().await?)
    }
}

struct DescribeInstanceTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for DescribeInstanceTool {
    fn name(&self) -> &'static str {
        "describe_instance"
    }

    fn description(&self) -> &'static str {
        "Shows state, type, addresses, launch time, security groups, storage and tags of one instance."
    }

    fn parameters(&self) -> Value {
        identifier_parameters()
    }

    async fn execute(&self, _: &ActionContext, request: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.describe_instance(identifier(request)?).await?)
    }
}

struct StartInstanceTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for StartInstanceTool {
    fn name(&self) -> &'static str {
        "start_instance"
    }

    fn description(&self) -> &'static str {
        "Starts an instance given its ID, Name tag or IP."
    }

    fn parameters(&self) -> Value {
        identifier_parameters()
    }

    async fn execute(&self, _: &ActionContext, request: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.start_instance(identifier(request)?).await?)
    }
}

struct StopInstanceTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for StopInstanceTool {
    fn name(&self) -> &'static str {
        "stop_instance"
    }

    fn description(&self) -> &'static str {
        "Stops an instance given its ID, Name tag or IP."
    }

    fn parameters(&self) -> Value {
        identifier_parameters()
    }

    async fn execute(&self, _: &ActionContext, request: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.stop_instance(identifier(request)?).await?)
    }
}

struct CreateInstanceTool {
    gateway: ResourceGateway,
    sessions: Arc<SlotFillingSessionManager>,
}

#[async_trait]
impl Tool for CreateInstanceTool {
    fn name(&self) -> &'static str {
        "create_instance"
    }

    fn description(&self) -> &'static str {
        "Creates an instance. Pass the user's message verbatim; missing details are asked for one at a time."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "The user's request text, including any instance details"
                }
            },
            "required": ["request"]
        })
    }

    async fn execute(
        &self,
        context: &ActionContext,
        request: &ActionRequest,
    ) -> Result<String, ToolError> {
        let text = request.str_argument("request").unwrap_or_default();
        let outcome = self
            .sessions
            .provision(&context.user_id, &context.correlation_id, text, &self.gateway)
            .await;
        match outcome {
            ProvisionOutcome::FollowUp(question) => Ok(question.question),
            ProvisionOutcome::Launched { confirmation, .. } => Ok(confirmation),
            ProvisionOutcome::Rejected { message } => Err(ToolError::Refused(message)),
            ProvisionOutcome::Unavailable { message, .. } => {
                Err(ToolError::Unavailable { message })
            }
        }
    }
}

struct ListSecurityGroupsTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for ListSecurityGroupsTool {
    fn name(&self) -> &'static str {
        "list_security_groups"
    }

    fn description(&self) -> &'static str {
        "Lists security groups with their names and IDs."
    }

    async fn execute(&self, _: &ActionContext, _: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.list_security_groups().await?)
    }
}

struct ListKeyPairsTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for ListKeyPairsTool {
    fn name(&self) -> &'static str {
        "list_key_pairs"
    }

    fn description(&self) -> &'static str {
        "Lists available key pair names."
    }

    async fn execute(&self, _: &ActionContext, _: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.list_key_pairs().await?)
    }
}

struct ListVolumeTypesTool {
    gateway: ResourceGateway,
}

#[async_trait]
impl Tool for ListVolumeTypesTool {
    fn name(&self) -> &'static str {
        "list_volume_types"
    }

    fn description(&self) -> &'static str {
        "Lists storage volume types and their common use cases."
    }

    async fn execute(&self, _: &ActionContext, _: &ActionRequest) -> Result<String, ToolError> {
        Ok(self.gateway.list_volume_types())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use cloudpilot_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink, NoopAuditSink};
    use cloudpilot_core::domain::conversation::{ActionRequest, FailureKind};
    use cloudpilot_gateway::{InMemoryComputeProvider, ResourceGateway};

    use crate::conversation::KeywordFragmentExtractor;
    use crate::sessions::{SessionStore, SlotFillingSessionManager};
    use crate::tools::{ActionContext, ActionDispatcher, Tool, ToolError, ToolRegistry};

    /// Sleeps for `delay_ms` and records when it finished.
    #[derive(Default)]
    struct DelayedEcho {
        finished: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for DelayedEcho {
        fn name(&self) -> &'static str {
            "delayed_echo"
        }

        fn description(&self) -> &'static str {
            "Echoes its call id after a delay"
        }

        async fn execute(
            &self,
            _context: &ActionContext,
            request: &ActionRequest,
        ) -> Result<String, ToolError> {
            let delay = request.arguments.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.finished.lock().expect("lock").push(request.correlation_id.clone());
            Ok(format!("echo {}", request.correlation_id))
        }
    }

    fn dispatcher(provider: Arc<InMemoryComputeProvider>) -> ActionDispatcher {
        let sessions = Arc::new(SlotFillingSessionManager::new(
            Arc::new(SessionStore::default()),
            Arc::new(KeywordFragmentExtractor::new()),
            Arc::new(NoopAuditSink),
        ));
        ActionDispatcher::new(Arc::new(ToolRegistry::standard(
            ResourceGateway::new(provider),
            sessions,
        )))
    }

    fn request(id: &str, operation: &str, arguments: Value) -> ActionRequest {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ActionRequest::new(id, operation, arguments)
    }

    #[test]
    fn standard_registry_exposes_eight_operations() {
        let dispatcher = dispatcher(Arc::new(InMemoryComputeProvider::default()));
        let registry = dispatcher.registry();

        assert_eq!(registry.len(), 8);
        assert_eq!(
            registry.names(),
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
        let create = registry.specs().into_iter().find(|spec| spec.name == "create_instance");
        let create = create.expect("create spec");
        assert_eq!(create.parameters["required"], json!(["request"]));
        assert!(create.parameters["properties"].get("user_id").is_none());
    }

    #[tokio::test]
    async fn results_keep_request_order_and_cardinality() {
        let dispatcher = dispatcher(Arc::new(InMemoryComputeProvider::with_defaults()));
        let context = ActionContext::new("alice", "req-1");
        let requests = vec![
            request("call-1", "list_volume_types", json!({})),
            request("call-2", "reboot_everything", json!({})),
            request("call-3", "list_key_pairs", json!({})),
            request("call-4", "start_instance", json!({ "identifier": "ghost" })),
        ];

        let results = dispatcher.execute(&context, &requests).await;

        assert_eq!(results.len(), 4);
        let ids = results.iter().map(|r| r.correlation_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["call-1", "call-2", "call-3", "call-4"]);
        assert!(results[0].payload.starts_with("**Available Volume Types:**"));
        assert_eq!(results[1].failure, Some(FailureKind::Recoverable));
        assert!(results[1].payload.contains("Unknown operation `reboot_everything`"));
        assert_eq!(results[2].payload, "**Available Key Pairs:**\n- my-key-pair");
        assert_eq!(results[3].payload, "⚠️ No instance found with identifier: ghost");
        assert!(!results[3].is_error());
    }

    #[tokio::test]
    async fn missing_identifier_is_a_recoverable_error() {
        let dispatcher = dispatcher(Arc::new(InMemoryComputeProvider::default()));
        let results = dispatcher
            .execute(&ActionContext::new("alice", "req-1"), &[request("c", "stop_instance", json!({}))])
            .await;

        assert_eq!(results[0].failure, Some(FailureKind::Recoverable));
        assert_eq!(results[0].payload, "❌ `stop_instance` needs the `identifier` argument.");
    }

    #[tokio::test]
    async fn unreachable_provider_marks_result_unavailable() {
        let provider = Arc::new(InMemoryComputeProvider::default());
        provider.set_unavailable(Some("dns failure")).await;
        let dispatcher = dispatcher(provider);

        let results = dispatcher
            .execute(&ActionContext::new("alice", "req-1"), &[request("c", "list_instances", json!({}))])
            .await;

        assert_eq!(results[0].failure, Some(FailureKind::Unavailable));
        assert!(results[0].payload.contains("dns failure"));
    }

    #[tokio::test]
    async fn create_uses_context_user_for_session() {
        let provider = Arc::new(InMemoryComputeProvider::with_defaults());
        let dispatcher = dispatcher(provider.clone());

        let first = dispatcher
            .execute(
                &ActionContext::new("alice", "req-1"),
                &[request("c1", "create_instance", json!({ "request": "t2.micro", "user_id": "mallory" }))],
            )
            .await;
        assert_eq!(first[0].payload, "Which OS image do you want? (e.g., Ubuntu 22.04, Amazon Linux 2)?");

        let other_user = dispatcher
            .execute(
                &ActionContext::new("bob", "req-2"),
                &[request("c2", "create_instance", json!({ "request": "Ubuntu" }))],
            )
            .await;
        assert_eq!(other_user[0].payload, "What instance type would you like? (e.g., t2.micro, t3.medium)");
        assert_eq!(provider.instance_count().await, 0);
    }

    #[tokio::test]
    async fn slow_first_action_still_comes_back_first() {
        let tool = DelayedEcho::default();
        let finished = tool.finished.clone();
        let mut registry = ToolRegistry::default();
        registry.register(tool);
        let dispatcher = ActionDispatcher::new(Arc::new(registry));
        let requests = vec![
            request("call_0", "delayed_echo", json!({ "delay_ms": 120 })),
            request("call_1", "delayed_echo", json!({ "delay_ms": 40 })),
            request("call_2", "delayed_echo", json!({ "delay_ms": 0 })),
        ];

        let results = dispatcher.execute(&ActionContext::new("alice", "req-1"), &requests).await;

        assert_eq!(*finished.lock().expect("lock"), vec!["call_2", "call_1", "call_0"]);
        let ids = results.iter().map(|r| r.correlation_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["call_0", "call_1", "call_2"]);
        assert_eq!(results[0].payload, "echo call_0");
    }

    #[tokio::test]
    async fn every_action_is_audited_with_its_outcome() {
        let provider = Arc::new(InMemoryComputeProvider::with_defaults());
        let audit = InMemoryAuditSink::default();
        let dispatcher = dispatcher(provider).with_audit_sink(Arc::new(audit.clone()));
        let requests = vec![
            request("c1", "list_key_pairs", json!({})),
            request("c2", "reboot_everything", json!({})),
        ];

        dispatcher.execute(&ActionContext::new("alice", "req-9"), &requests).await;

        let events = audit.events_of_type("dispatch.action_completed");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.category == AuditCategory::Gateway));
        assert!(events.iter().all(|event| event.correlation_id == "req-9"));
        let listed = events
            .iter()
            .find(|event| event.metadata.get("call_id").map(String::as_str) == Some("c1"))
            .expect("list event");
        assert_eq!(listed.outcome, AuditOutcome::Success);
        assert_eq!(listed.user_id, "alice");
        let unknown = events
            .iter()
            .find(|event| event.metadata.get("call_id").map(String::as_str) == Some("c2"))
            .expect("unknown operation event");
        assert_eq!(unknown.outcome, AuditOutcome::Rejected);
    }
}

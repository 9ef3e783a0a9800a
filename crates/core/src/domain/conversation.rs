use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// A structured instruction from the decider to invoke a named operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub correlation_id: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(
        correlation_id: impl Into<String>,
        operation: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self { correlation_id: correlation_id.into(), operation: operation.into(), arguments }
    }

    pub fn str_argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation ran and was refused; the conversation can continue.
    Recoverable,
    /// The resource provider could not be reached at all.
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub correlation_id: String,
    pub operation: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ActionResult {
    pub fn success(request: &ActionRequest, payload: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            operation: request.operation.clone(),
            payload: payload.into(),
            failure: None,
        }
    }

    pub fn failure(request: &ActionRequest, kind: FailureKind, payload: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            operation: request.operation.clone(),
            payload: payload.into(),
            failure: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Only ever populated on assistant turns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,
    /// Set on tool-result turns to point back at the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_actions(
        content: impl Into<String>,
        action_requests: Vec<ActionRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            action_requests,
            correlation_id: None,
        }
    }

    pub fn tool_result(result: &ActionResult) -> Self {
        Self {
            role: Role::ToolResult,
            content: result.payload.clone(),
            action_requests: Vec::new(),
            correlation_id: Some(result.correlation_id.clone()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), action_requests: Vec::new(), correlation_id: None }
    }

    pub fn has_actions(&self) -> bool {
        !self.action_requests.is_empty()
    }
}

/// Turn history for one top-level request.
///
/// Holds at most one system turn and keeps it at index zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn seeded(user_message: impl Into<String>) -> Self {
        Self { turns: vec![ConversationTurn::user(user_message)] }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn has_system_prompt(&self) -> bool {
        self.turns.iter().any(|turn| turn.role == Role::System)
    }

    /// Inserts the system prompt as the first turn unless one is already present.
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        if !self.has_system_prompt() {
            self.turns.insert(0, ConversationTurn::system(prompt));
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) -> Result<(), DomainError> {
        if turn.role == Role::System {
            return Err(DomainError::InvariantViolation(
                "system turns may only be inserted through ensure_system_prompt".to_string(),
            ));
        }
        if turn.role != Role::Assistant && turn.has_actions() {
            return Err(DomainError::InvariantViolation(
                "only assistant turns may carry action requests".to_string(),
            ));
        }
        self.turns.push(turn);
        Ok(())
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Newline-joined text of every assistant turn, skipping empty ones.
    pub fn assistant_transcript(&self) -> String {
        self.turns
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .map(|turn| turn.content.trim())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

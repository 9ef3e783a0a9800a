use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use cloudpilot_core::config::{LlmConfig, LlmProvider};
use cloudpilot_core::domain::conversation::{ActionRequest, ConversationTurn, Role};

use crate::tools::ToolSpec;

const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum DeciderError {
    #[error("decider transport failure: {0}")]
    Transport(String),
    #[error("decider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decider response could not be decoded: {0}")]
    Decode(String),
    #[error("decider misconfigured: {0}")]
    Configuration(String),
}

/// Opaque next-step capability: given the turn history, produce one assistant
/// turn carrying zero or more action requests.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(
        &self,
        turns: &[ConversationTurn],
        tools: &[ToolSpec],
    ) -> Result<ConversationTurn, DeciderError>;
}

/// Chat-completions client for OpenAI and OpenAI-compatible servers (Ollama).
pub struct OpenAiDecider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiDecider {
    pub fn from_config(config: &LlmConfig) -> Result<Self, DeciderError> {
        let default_base = match config.provider {
            LlmProvider::OpenAi => OPENAI_BASE_URL,
            LlmProvider::Ollama => OLLAMA_BASE_URL,
        };
        let base_url = config.base_url.as_deref().unwrap_or(default_base);
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| DeciderError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(&self, turns: &[ConversationTurn], tools: &[ToolSpec]) -> Value {
        let messages = turns.iter().map(turn_to_message).collect::<Vec<_>>();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_function).collect());
        }
        body
    }
}

#[async_trait]
impl Decider for OpenAiDecider {
    async fn decide(
        &self,
        turns: &[ConversationTurn],
        tools: &[ToolSpec],
    ) -> Result<ConversationTurn, DeciderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&self.build_body(turns, tools));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        debug!(event_name = "decider.request", model = %self.model, turns = turns.len(), "calling decider");
        let response =
            request.send().await.map_err(|error| DeciderError::Transport(error.to_string()))?;
        let status = response.status();
        let text =
            response.text().await.map_err(|error| DeciderError::Transport(error.to_string()))?;
        if !status.is_success() {
            warn!(event_name = "decider.http_error", status = status.as_u16(), "decider call failed");
            return Err(DeciderError::Status { status: status.as_u16(), body: text });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|error| DeciderError::Decode(error.to_string()))?;
        parse_completion(&body)
    }
}

fn turn_to_message(turn: &ConversationTurn) -> Value {
    match turn.role {
        Role::System => json!({ "role": "system", "content": turn.content }),
        Role::User => json!({ "role": "user", "content": turn.content }),
        Role::ToolResult => json!({
            "role": "tool",
            "tool_call_id": turn.correlation_id.clone().unwrap_or_default(),
            "content": turn.content,
        }),
        Role::Assistant => {
            let mut message = json!({ "role": "assistant" });
            message["content"] = if turn.content.is_empty() && turn.has_actions() {
                Value::Null
            } else {
                Value::String(turn.content.clone())
            };
            if turn.has_actions() {
                let calls = turn
                    .action_requests
                    .iter()
                    .map(|request| {
                        json!({
                            "id": request.correlation_id,
                            "type": "function",
                            "function": {
                                "name": request.operation,
                                "arguments": Value::Object(request.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
                message["tool_calls"] = Value::Array(calls);
            }
            message
        }
    }
}

fn tool_to_function(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_completion(body: &Value) -> Result<ConversationTurn, DeciderError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| DeciderError::Decode("response has no choices[0].message".to_string()))?;

    let content = message.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
    let requests = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect::<Vec<_>>())
        .unwrap_or_default();

    Ok(ConversationTurn::assistant_with_actions(content, requests))
}

fn parse_tool_call(call: &Value) -> Option<ActionRequest> {
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?;
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(event_name = "decider.bad_arguments", operation = %name, "ignoring unparseable arguments");
                Map::new()
            }
        },
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Some(ActionRequest::new(id, name, arguments))
}

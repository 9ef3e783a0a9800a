use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use cloudpilot_agent::AgentRuntime;
use cloudpilot_core::config::WhatsAppConfig;
use cloudpilot_core::errors::InterfaceError;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("whatsapp client could not be built: {0}")]
    Client(String),
    #[error("whatsapp delivery failed: {0}")]
    Delivery(String),
    #[error("whatsapp delivery rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub text: String,
}

/// Outbound side of the WhatsApp Cloud API plus the webhook settings.
pub struct WhatsAppChannel {
    client: Client,
    messages_url: String,
    access_token: SecretString,
    phone_number_id: String,
    verify_token: SecretString,
    chunk_size: usize,
}

impl WhatsAppChannel {
    pub fn from_config(config: &WhatsAppConfig, timeout: Duration) -> Result<Self, WhatsAppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| WhatsAppError::Client(error.to_string()))?;
        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.api_base_url.trim_end_matches('/'),
                config.phone_number_id
            ),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            verify_token: config.verify_token.clone(),
            chunk_size: config.chunk_size.max(1),
        })
    }

    pub fn verifies(&self, mode: Option<&str>, token: Option<&str>) -> bool {
        mode == Some("subscribe") && token == Some(self.verify_token.expose_secret())
    }

    pub async fn send_text(&self, to: &str, body: &str) -> Result<(), WhatsAppError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "text": { "body": body },
        });
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| WhatsAppError::Delivery(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }

    /// Sends `answer` in order, one chunk per message.
    pub async fn deliver(&self, to: &str, answer: &str) -> Result<(), WhatsAppError> {
        for chunk in chunk_message(answer, self.chunk_size) {
            self.send_text(to, &chunk).await?;
        }
        Ok(())
    }
}

/// Splits on character boundaries; whitespace-only chunks are dropped.
pub fn chunk_message(text: &str, chunk_size: usize) -> Vec<String> {
    let characters = text.chars().collect::<Vec<_>>();
    characters
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect::<String>().trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Pulls `(from, text.body)` pairs out of a webhook payload, skipping the
/// bot's own number and messages without a sender.
pub fn inbound_messages(payload: &Value, own_number: &str) -> Vec<InboundMessage> {
    payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
        .flatten()
        .filter_map(|change| change.pointer("/value/messages").and_then(Value::as_array))
        .flatten()
        .filter_map(|message| {
            let from = message.get("from").and_then(Value::as_str).unwrap_or_default().trim();
            if from.is_empty() || from == own_number {
                return None;
            }
            let text = message
                .pointer("/text/body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            Some(InboundMessage { from: from.to_string(), text })
        })
        .collect()
}

#[derive(Clone)]
pub struct WhatsAppState {
    pub runtime: Arc<AgentRuntime>,
    pub channel: Arc<WhatsAppChannel>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
}

pub fn router(state: WhatsAppState) -> Router {
    Router::new().route("/webhook", get(verify).post(receive)).with_state(state)
}

async fn verify(
    State(state): State<WhatsAppState>,
    Query(params): Query<VerifyParams>,
) -> Result<Response, ApiError> {
    if state.channel.verifies(params.mode.as_deref(), params.verify_token.as_deref()) {
        info!(event_name = "whatsapp.webhook_verified", "webhook verification succeeded");
        return Ok((StatusCode::OK, params.challenge.unwrap_or_default()).into_response());
    }
    Err(ApiError(InterfaceError::Forbidden {
        message: format!("webhook verification failed for mode {:?}", params.mode),
        correlation_id: Uuid::new_v4().to_string(),
    }))
}

async fn receive(State(state): State<WhatsAppState>, Json(payload): Json<Value>) -> Json<Value> {
    for message in inbound_messages(&payload, &state.channel.phone_number_id) {
        let runtime = state.runtime.clone();
        let channel = state.channel.clone();
        tokio::spawn(async move { process(&runtime, &channel, message).await });
    }
    Json(json!({ "status": "success" }))
}

async fn process(runtime: &AgentRuntime, channel: &WhatsAppChannel, message: InboundMessage) {
    let answer = runtime.handle_message(&message.from, &message.text).await;
    if let Err(error) = channel.deliver(&message.from, &answer).await {
        warn!(
            event_name = "whatsapp.delivery_failed",
            user_id = %message.from,
            error = %error,
            "could not deliver answer"
        );
        if let Err(error) = channel.send_text(&message.from, &format!("❌ Error: {error}")).await {
            warn!(
                event_name = "whatsapp.error_delivery_failed",
                user_id = %message.from,
                error = %error,
                "could not deliver error notice"
            );
        }
    }
}

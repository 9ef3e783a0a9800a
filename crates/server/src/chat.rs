use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cloudpilot_agent::AgentRuntime;
use cloudpilot_core::errors::InterfaceError;

use crate::error::ApiError;

const ANONYMOUS_USER: &str = "anonymous";

#[derive(Clone)]
pub struct ChatState {
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

pub fn router(state: ChatState) -> Router {
    Router::new().route("/ops_agent", post(ops_agent)).with_state(state)
}

async fn ops_agent(
    State(state): State<ChatState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    })?;

    let user_id = request
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|user_id| !user_id.is_empty())
        .unwrap_or(ANONYMOUS_USER);
    let response = state.runtime.handle_message(user_id, &request.message).await;
    Ok(Json(ChatResponse { response }))
}

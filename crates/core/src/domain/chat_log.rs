use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `(user_input, bot_response)` pair produced by a top-level request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub id: String,
    pub user_id: String,
    pub user_input: String,
    pub bot_response: String,
    pub recorded_at: DateTime<Utc>,
}

impl ChatExchange {
    pub fn new(
        user_id: impl Into<String>,
        user_input: impl Into<String>,
        bot_response: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            user_input: user_input.into(),
            bot_response: bot_response.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("chat log sink failure: {0}")]
pub struct ChatLogError(pub String);

/// Receives finished exchanges; callers never wait on the outcome.
#[async_trait]
pub trait ChatLogSink: Send + Sync {
    async fn record(&self, exchange: ChatExchange) -> Result<(), ChatLogError>;
}

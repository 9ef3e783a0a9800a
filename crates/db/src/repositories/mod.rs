use async_trait::async_trait;
use thiserror::Error;

use cloudpilot_core::domain::chat_log::ChatExchange;

pub mod chat_log;
pub mod memory;

pub use chat_log::SqlChatLogRepository;
pub use memory::InMemoryChatLogRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChatLogRepository: Send + Sync {
    async fn append(&self, exchange: &ChatExchange) -> Result<(), RepositoryError>;

    /// Most recent first.
    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatExchange>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}

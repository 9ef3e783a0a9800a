use async_trait::async_trait;
use tokio::sync::RwLock;

use cloudpilot_core::domain::chat_log::{ChatExchange, ChatLogError, ChatLogSink};

use super::{ChatLogRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryChatLogRepository {
    exchanges: RwLock<Vec<ChatExchange>>,
}

#[async_trait]
impl ChatLogRepository for InMemoryChatLogRepository {
    async fn append(&self, exchange: &ChatExchange) -> Result<(), RepositoryError> {
        self.exchanges.write().await.push(exchange.clone());
        Ok(())
    }

    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatExchange>, RepositoryError> {
        let exchanges = self.exchanges.read().await;
        Ok(exchanges
            .iter()
            .rev()
            .filter(|exchange| exchange.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.exchanges.read().await.len() as u64)
    }
}

#[async_trait]
impl ChatLogSink for InMemoryChatLogRepository {
    async fn record(&self, exchange: ChatExchange) -> Result<(), ChatLogError> {
        self.append(&exchange).await.map_err(|error| ChatLogError(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::domain::chat_log::{ChatExchange, ChatLogSink};

    use super::InMemoryChatLogRepository;
    use crate::repositories::ChatLogRepository;

    #[tokio::test]
    async fn recent_exchanges_are_scoped_to_the_user() {
        let repo = InMemoryChatLogRepository::default();
        repo.record(ChatExchange::new("alice", "list", "none")).await.expect("record");
        repo.record(ChatExchange::new("bob", "hi", "hello")).await.expect("record");
        repo.record(ChatExchange::new("alice", "start web1", "starting")).await.expect("record");

        let recent = repo.recent_for_user("alice", 10).await.expect("query");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_input, "start web1");
        assert_eq!(repo.count().await.expect("count"), 3);
    }
}

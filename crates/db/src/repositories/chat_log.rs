use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use cloudpilot_core::domain::chat_log::{ChatExchange, ChatLogError, ChatLogSink};

use super::{ChatLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChatLogRepository {
    pool: DbPool,
}

impl SqlChatLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatLogRepository for SqlChatLogRepository {
    async fn append(&self, exchange: &ChatExchange) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_log (id, user_id, user_input, bot_response, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exchange.id)
        .bind(&exchange.user_id)
        .bind(&exchange.user_input)
        .bind(&exchange.bot_response)
        .bind(exchange.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(event_name = "db.chat_log_appended", exchange_id = %exchange.id, "chat exchange stored");
        Ok(())
    }

    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ChatExchange>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, user_input, bot_response, recorded_at
            FROM chat_log
            WHERE user_id = ?
            ORDER BY recorded_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_exchange_from_row).collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_log")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|_| RepositoryError::Decode(format!("negative count: {count}")))
    }
}

#[async_trait]
impl ChatLogSink for SqlChatLogRepository {
    async fn record(&self, exchange: ChatExchange) -> Result<(), ChatLogError> {
        self.append(&exchange).await.map_err(|error| ChatLogError(error.to_string()))
    }
}

fn chat_exchange_from_row(row: &SqliteRow) -> Result<ChatExchange, RepositoryError> {
    let recorded_at: String = row.try_get("recorded_at")?;
    Ok(ChatExchange {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_input: row.try_get("user_input")?,
        bot_response: row.try_get("bot_response")?,
        recorded_at: parse_timestamp(&recorded_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid recorded_at `{value}`: {error}")))
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::domain::chat_log::{ChatExchange, ChatLogSink};

    use super::SqlChatLogRepository;
    use crate::migrations::run_pending;
    use crate::repositories::ChatLogRepository;
    use crate::{connect_with_settings, DbPool};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn recorded_exchanges_round_trip() {
        let repo = SqlChatLogRepository::new(migrated_pool().await);
        let exchange = ChatExchange::new("alice", "list my instances", "No instances found.");

        repo.record(exchange.clone()).await.expect("record");

        let stored = repo.recent_for_user("alice", 5).await.expect("query");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, exchange.id);
        assert_eq!(stored[0].bot_response, "No instances found.");
        assert_eq!(stored[0].recorded_at.timestamp(), exchange.recorded_at.timestamp());
    }

    #[tokio::test]
    async fn limit_and_user_filter_apply() {
        let repo = SqlChatLogRepository::new(migrated_pool().await);
        for input in ["one", "two", "three"] {
            repo.append(&ChatExchange::new("alice", input, "ok")).await.expect("append");
        }
        repo.append(&ChatExchange::new("bob", "hi", "hello")).await.expect("append");

        assert_eq!(repo.recent_for_user("alice", 2).await.expect("query").len(), 2);
        assert!(repo.recent_for_user("carol", 2).await.expect("query").is_empty());
        assert_eq!(repo.count().await.expect("count"), 4);
    }

    #[tokio::test]
    async fn missing_table_surfaces_as_sink_error() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let repo = SqlChatLogRepository::new(pool);

        let error = repo.record(ChatExchange::new("alice", "hi", "hello")).await;
        assert!(error.is_err());
    }
}

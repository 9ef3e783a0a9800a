use std::sync::Arc;
use std::time::Duration;

use cloudpilot_agent::{assemble, AgentRuntime, AssemblyError, SessionStore, TracingAuditSink};
use cloudpilot_core::config::{AppConfig, ConfigError, LoadOptions};
use cloudpilot_db::{connect_with_settings, migrations, DbPool, SqlChatLogRepository};
use thiserror::Error;
use tracing::info;

use crate::whatsapp::{WhatsAppChannel, WhatsAppError};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
    pub whatsapp: Option<Arc<WhatsAppChannel>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Agent(#[from] AssemblyError),
    #[error("whatsapp channel setup failed: {0}")]
    WhatsApp(#[source] WhatsAppError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database ready"
    );

    let stack = assemble(&config, Arc::new(TracingAuditSink))?;
    let runtime = stack.runtime.with_chat_log(Arc::new(SqlChatLogRepository::new(db_pool.clone())));
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        backend = ?config.compute.backend,
        model = %config.llm.model,
        operations = runtime.dispatcher().registry().len(),
        "agent runtime assembled"
    );

    let whatsapp = if config.whatsapp.enabled {
        let channel = WhatsAppChannel::from_config(&config.whatsapp, Duration::from_secs(30))
            .map_err(BootstrapError::WhatsApp)?;
        Some(Arc::new(channel))
    } else {
        None
    };

    Ok(Application { config, db_pool, runtime: Arc::new(runtime), sessions: stack.sessions, whatsapp })
}

#[cfg(test)]
mod tests {
    use cloudpilot_core::config::{ComputeBackend, ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some(database_url.to_string()),
            llm_api_key: Some("sk-test".to_string()),
            compute_backend: Some(ComputeBackend::Memory),
            ..ConfigOverrides::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_compute_endpoint() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                compute_backend: Some(ComputeBackend::Http),
                ..overrides("sqlite::memory:")
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("compute.endpoint"));
    }

    #[tokio::test]
    async fn bootstrap_wires_database_and_runtime() {
        let app = bootstrap(LoadOptions {
            overrides: overrides("sqlite::memory:?cache=shared"),
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with memory backend");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'chat_log'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("chat_log table");
        assert_eq!(table_count, 1);
        assert_eq!(app.runtime.settings().max_round_trips, 10);
        assert!(app.whatsapp.is_none());
        assert!(app.sessions.is_empty().await);

        app.db_pool.close().await;
    }
}

mod bootstrap;
mod chat;
mod error;
mod health;
mod sweeper;
mod whatsapp;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use cloudpilot_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::Application;

fn init_logging(config: &AppConfig) {
    use cloudpilot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.trim().to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

fn app_router(app: &Application) -> Router {
    let mut router = health::router(health::HealthState {
        db_pool: app.db_pool.clone(),
        sessions: app.sessions.clone(),
    })
    .merge(chat::router(chat::ChatState { runtime: app.runtime.clone() }));

    if let Some(channel) = &app.whatsapp {
        router = router.merge(whatsapp::router(whatsapp::WhatsAppState {
            runtime: app.runtime.clone(),
            channel: channel.clone(),
        }));
    }
    router
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let max_idle = Duration::from_secs(app.config.agent.session_idle_secs);
    let sweeper = sweeper::spawn(app.sessions.clone(), max_idle, sweeper::interval_for(max_idle));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        whatsapp_enabled = app.whatsapp.is_some(),
        "cloudpilot-server listening"
    );

    axum::serve(listener, app_router(&app)).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "cloudpilot-server stopping"
    );
    sweeper.abort();
    tokio::time::timeout(
        Duration::from_secs(app.config.server.graceful_shutdown_secs),
        app.db_pool.close(),
    )
    .await
    .ok();

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}

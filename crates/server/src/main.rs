mod api;
mod auth;
mod bootstrap;
mod error;
mod health;

use std::time::Duration;

use anyhow::Result;
use factory_core::config::{AppConfig, LoadOptions};
use factory_deploy::BridgeTasks;
use tower_http::trace::TraceLayer;

fn init_logging(config: &AppConfig) {
    use factory_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let bridge_tasks = app.orchestrator.tasks().clone();

    let router = health::router(app.db_pool.clone(), bridge_tasks.clone())
        .merge(api::router(app.api_state()))
        .layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "factory-server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(bridge_tasks.clone()))
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        running_bridge_deploys = bridge_tasks.running_count(),
        "factory-server stopping"
    );
    bridge_tasks.shutdown(Duration::from_secs(app.config.server.graceful_shutdown_secs)).await;
    app.db_pool.close().await;

    Ok(())
}

/// Resolves on ctrl-c. Blocking bridge requests are cancelled so in-flight connections drain.
async fn wait_for_shutdown(bridge_tasks: BridgeTasks) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for the shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    bridge_tasks.cancel_all();
}

use std::sync::Arc;

use factory_core::auth::{HmacTokenVerifier, TokenVerifier};
use factory_core::config::{AppConfig, ConfigError, LoadOptions};
use factory_core::errors::ProviderError;
use factory_db::{connect_with_settings, migrations, DbPool, SqlAgentRepository, SqlProjectRepository};
use factory_deploy::{DeploySettings, DeploymentOrchestrator, DigitalOceanClient, ElevenLabsClient};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: DeploymentOrchestrator,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState { orchestrator: self.orchestrator.clone(), verifier: Arc::clone(&self.verifier) }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("platform client setup failed: {0}")]
    PlatformClient(#[from] ProviderError),
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
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let orchestrator = DeploymentOrchestrator::new(
        Arc::new(SqlAgentRepository::new(db_pool.clone())),
        Arc::new(SqlProjectRepository::new(db_pool.clone())),
        Arc::new(ElevenLabsClient::from_config(&config.voice)?),
        Arc::new(DigitalOceanClient::from_config(&config.cloud)?),
        DeploySettings::from_config(&config),
    );
    info!(
        event_name = "system.bootstrap.platforms_ready",
        correlation_id = "bootstrap",
        voice_base_url = %config.voice.base_url,
        cloud_base_url = %config.cloud.base_url,
        "platform clients configured"
    );

    Ok(Application {
        verifier: Arc::new(HmacTokenVerifier::from_config(&config.auth)),
        config,
        db_pool,
        orchestrator,
    })
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deploy::payload::{AppSpec, VoiceAgentDefinition};
use crate::errors::ProviderError;

pub const LIVE_PHASE: &str = "ACTIVE";

/// Voice-agent hosting platform.
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Creates the agent and returns the platform's identifier for it.
    async fn create_agent(&self, definition: &VoiceAgentDefinition) -> Result<String, ProviderError>;

    async fn update_agent(
        &self,
        voice_agent_id: &str,
        definition: &VoiceAgentDefinition,
    ) -> Result<(), ProviderError>;
}

/// Cloud application platform hosting the bridge service.
#[async_trait]
pub trait CloudPlatform: Send + Sync {
    /// Submits an app spec and returns the new app id.
    async fn create_app(&self, spec: &AppSpec) -> Result<String, ProviderError>;

    async fn app_status(&self, app_id: &str) -> Result<AppStatus, ProviderError>;
}

/// Snapshot of an app's active deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub phase: Option<String>,
    pub live_url: Option<String>,
}

impl AppStatus {
    pub fn live(url: impl Into<String>) -> Self {
        Self { phase: Some(LIVE_PHASE.to_string()), live_url: Some(url.into()) }
    }

    pub fn pending(phase: impl Into<String>) -> Self {
        Self { phase: Some(phase.into()), live_url: None }
    }

    /// The URL, only when the deployment is active and the URL is present together.
    pub fn live_url(&self) -> Option<&str> {
        if self.phase.as_deref() != Some(LIVE_PHASE) {
            return None;
        }
        self.live_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

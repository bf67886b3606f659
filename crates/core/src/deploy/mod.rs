//! Pure building blocks of the two-phase deploy: payload shapes, naming, polling
//! bounds and the platform contracts the orchestrator drives.

pub mod app_name;
pub mod payload;
pub mod ports;

use std::time::Duration;

use crate::config::CloudConfig;

pub use app_name::{derive_application_name, ApplicationName};
pub use payload::{AppSpec, BridgeTemplate, VoiceAgentDefinition, VoiceDefaults};
pub use ports::{AppStatus, CloudPlatform, VoicePlatform};

/// Bounds for waiting on a cloud app to go live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(5), max_attempts: 60 }
    }
}

impl PollPolicy {
    pub fn from_config(config: &CloudConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.max_poll_attempts,
        }
    }

    /// Worst-case wall time spent sleeping between attempts.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

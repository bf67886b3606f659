//! Scripted platform fakes for exercising the orchestrator without network access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use factory_core::deploy::{AppSpec, AppStatus, CloudPlatform, VoiceAgentDefinition, VoicePlatform};
use factory_core::errors::ProviderError;

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, PartialEq)]
pub enum VoiceCall {
    Create(VoiceAgentDefinition),
    Update { voice_agent_id: String, definition: VoiceAgentDefinition },
}

/// Voice platform that replays queued results. Creates fall back to `voice-agent-<n>`
/// and updates to success once the queues run dry.
#[derive(Clone, Default)]
pub struct ScriptedVoicePlatform {
    state: Arc<Mutex<VoiceState>>,
}

#[derive(Default)]
struct VoiceState {
    create_results: VecDeque<Result<String, ProviderError>>,
    update_results: VecDeque<Result<(), ProviderError>>,
    calls: Vec<VoiceCall>,
}

impl ScriptedVoicePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_results(
        self,
        results: impl IntoIterator<Item = Result<String, ProviderError>>,
    ) -> Self {
        lock(&self.state).create_results.extend(results);
        self
    }

    pub fn with_update_results(
        self,
        results: impl IntoIterator<Item = Result<(), ProviderError>>,
    ) -> Self {
        lock(&self.state).update_results.extend(results);
        self
    }

    pub fn calls(&self) -> Vec<VoiceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, VoiceCall::Create(_))).count()
    }

    pub fn update_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, VoiceCall::Update { .. })).count()
    }
}

#[async_trait]
impl VoicePlatform for ScriptedVoicePlatform {
    async fn create_agent(&self, definition: &VoiceAgentDefinition) -> Result<String, ProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(VoiceCall::Create(definition.clone()));
        let created = state.calls.len();
        state.create_results.pop_front().unwrap_or_else(|| Ok(format!("voice-agent-{created}")))
    }

    async fn update_agent(
        &self,
        voice_agent_id: &str,
        definition: &VoiceAgentDefinition,
    ) -> Result<(), ProviderError> {
        let mut state = lock(&self.state);
        state.calls.push(VoiceCall::Update {
            voice_agent_id: voice_agent_id.to_string(),
            definition: definition.clone(),
        });
        state.update_results.pop_front().unwrap_or(Ok(()))
    }
}

/// Cloud platform that replays queued app creations and status snapshots.
#[derive(Clone, Default)]
pub struct ScriptedCloudPlatform {
    state: Arc<Mutex<CloudState>>,
}

#[derive(Default)]
struct CloudState {
    create_results: VecDeque<Result<String, ProviderError>>,
    statuses: VecDeque<Result<AppStatus, ProviderError>>,
    default_status: Option<AppStatus>,
    create_delay: Option<Duration>,
    created_specs: Vec<AppSpec>,
    status_calls: Vec<String>,
}

impl ScriptedCloudPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_results(
        self,
        results: impl IntoIterator<Item = Result<String, ProviderError>>,
    ) -> Self {
        lock(&self.state).create_results.extend(results);
        self
    }

    pub fn with_statuses(
        self,
        statuses: impl IntoIterator<Item = Result<AppStatus, ProviderError>>,
    ) -> Self {
        lock(&self.state).statuses.extend(statuses);
        self
    }

    /// Status served once the queue is empty. Without one, polls see an unknown phase.
    pub fn with_default_status(self, status: AppStatus) -> Self {
        lock(&self.state).default_status = Some(status);
        self
    }

    pub fn with_create_delay(self, delay: Duration) -> Self {
        lock(&self.state).create_delay = Some(delay);
        self
    }

    pub fn created_specs(&self) -> Vec<AppSpec> {
        lock(&self.state).created_specs.clone()
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).created_specs.len()
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls.len()
    }
}

#[async_trait]
impl CloudPlatform for ScriptedCloudPlatform {
    async fn create_app(&self, spec: &AppSpec) -> Result<String, ProviderError> {
        let delay = {
            let mut state = lock(&self.state);
            state.created_specs.push(spec.clone());
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        let created = state.created_specs.len();
        state.create_results.pop_front().unwrap_or_else(|| Ok(format!("app-{created}")))
    }

    async fn app_status(&self, app_id: &str) -> Result<AppStatus, ProviderError> {
        let mut state = lock(&self.state);
        state.status_calls.push(app_id.to_string());
        match state.statuses.pop_front() {
            Some(result) => result,
            None => Ok(state.default_status.clone().unwrap_or_default()),
        }
    }
}

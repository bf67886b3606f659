use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::project::ProjectId;
use crate::errors::{DomainError, PhaseViolation};

pub const DEFAULT_FIRST_MESSAGE: &str = "Hello! How can I help you?";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted deployment status.
///
/// `DRAFT -> DEPLOYING -> ACTIVE` covers the voice platform phase and
/// `ACTIVE -> DEPLOYING_BRIDGE -> PUBLISHED` the bridge phase. Either in-flight
/// status falls to `ERROR` when an outbound call fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Draft,
    Deploying,
    Active,
    DeployingBridge,
    Published,
    Error,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Deploying => "DEPLOYING",
            Self::Active => "ACTIVE",
            Self::DeployingBridge => "DEPLOYING_BRIDGE",
            Self::Published => "PUBLISHED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "DEPLOYING" => Some(Self::Deploying),
            "ACTIVE" => Some(Self::Active),
            "DEPLOYING_BRIDGE" => Some(Self::DeployingBridge),
            "PUBLISHED" => Some(Self::Published),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Deploying | Self::DeployingBridge)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub project_id: ProjectId,
    pub agent_name: String,
    pub system_prompt: String,
    pub voice_id: String,
    pub first_message: String,
    pub react_flow_data: Value,
    pub status: AgentStatus,
    pub elevenlabs_agent_id: Option<String>,
    pub digitalocean_app_id: Option<String>,
    pub deployment_url: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new_draft(
        id: AgentId,
        project_id: ProjectId,
        agent_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            agent_name: agent_name.into(),
            system_prompt: String::new(),
            voice_id: String::new(),
            first_message: String::new(),
            react_flow_data: default_canvas(),
            status: AgentStatus::Draft,
            elevenlabs_agent_id: None,
            digitalocean_app_id: None,
            deployment_url: None,
            deployed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_voice_deployed(&self) -> bool {
        self.elevenlabs_agent_id.is_some()
    }

    pub fn is_bridged(&self) -> bool {
        self.digitalocean_app_id.is_some()
    }

    /// Names of the config fields a voice platform deploy cannot do without.
    pub fn missing_config_fields(&self) -> Vec<&'static str> {
        [
            ("agent_name", &self.agent_name),
            ("system_prompt", &self.system_prompt),
            ("voice_id", &self.voice_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn ensure_can_deploy_voice(&self) -> Result<(), DomainError> {
        if self.is_voice_deployed() {
            return Err(self.violation(PhaseViolation::AlreadyDeployed));
        }
        self.ensure_not_in_flight(&AgentTransition::BeginVoiceDeploy)?;
        self.ensure_config_complete()
    }

    /// Returns the voice platform id the sync must target.
    pub fn ensure_can_sync_voice(&self) -> Result<&str, DomainError> {
        let Some(voice_agent_id) = self.elevenlabs_agent_id.as_deref() else {
            return Err(self.violation(PhaseViolation::NotDeployed));
        };
        self.ensure_config_complete()?;
        Ok(voice_agent_id)
    }

    /// Returns the voice platform id the bridge will be bound to.
    pub fn ensure_can_deploy_bridge(&self) -> Result<&str, DomainError> {
        let Some(voice_agent_id) = self.elevenlabs_agent_id.as_deref() else {
            return Err(self.violation(PhaseViolation::Phase1Required));
        };
        if self.is_bridged() {
            return Err(self.violation(PhaseViolation::AlreadyBridged));
        }
        self.ensure_not_in_flight(&AgentTransition::BeginBridgeDeploy)?;
        Ok(voice_agent_id)
    }

    fn ensure_config_complete(&self) -> Result<(), DomainError> {
        let missing = self.missing_config_fields();
        if missing.is_empty() {
            return Ok(());
        }

        Err(DomainError::IncompleteConfig {
            agent_id: self.id.0.clone(),
            missing: missing.into_iter().map(str::to_string).collect(),
        })
    }

    fn ensure_not_in_flight(&self, transition: &AgentTransition) -> Result<(), DomainError> {
        if self.status.is_in_flight() {
            return Err(self.violation(PhaseViolation::TransitionConflict {
                transition: transition.name(),
                status: self.status,
            }));
        }
        Ok(())
    }

    fn violation(&self, violation: PhaseViolation) -> DomainError {
        DomainError::InvalidState { agent_id: self.id.0.clone(), violation }
    }
}

pub fn default_canvas() -> Value {
    json!({ "position": { "x": 250, "y": 200 } })
}

/// Which identifier columns must hold for a transition to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierGuard {
    VoiceUnset,
    VoiceSetBridgeUnset,
    Any,
}

impl IdentifierGuard {
    pub fn holds(self, agent: &Agent) -> bool {
        match self {
            Self::VoiceUnset => !agent.is_voice_deployed(),
            Self::VoiceSetBridgeUnset => agent.is_voice_deployed() && !agent.is_bridged(),
            Self::Any => true,
        }
    }
}

/// A single compare-and-set step of the deployment state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentTransition {
    BeginVoiceDeploy,
    CompleteVoiceDeploy { voice_agent_id: String },
    BeginBridgeDeploy,
    CompleteBridgeDeploy { app_id: String, deployment_url: String },
    Fail { from: AgentStatus },
}

impl AgentTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginVoiceDeploy => "begin_voice_deploy",
            Self::CompleteVoiceDeploy { .. } => "complete_voice_deploy",
            Self::BeginBridgeDeploy => "begin_bridge_deploy",
            Self::CompleteBridgeDeploy { .. } => "complete_bridge_deploy",
            Self::Fail { .. } => "fail",
        }
    }

    /// Statuses the persisted row must currently hold.
    pub fn expected_statuses(&self) -> &[AgentStatus] {
        match self {
            Self::BeginVoiceDeploy => &[AgentStatus::Draft, AgentStatus::Error],
            Self::CompleteVoiceDeploy { .. } => &[AgentStatus::Deploying],
            Self::BeginBridgeDeploy => &[AgentStatus::Active, AgentStatus::Error],
            Self::CompleteBridgeDeploy { .. } => &[AgentStatus::DeployingBridge],
            Self::Fail { from } => std::slice::from_ref(from),
        }
    }

    pub fn target(&self) -> AgentStatus {
        match self {
            Self::BeginVoiceDeploy => AgentStatus::Deploying,
            Self::CompleteVoiceDeploy { .. } => AgentStatus::Active,
            Self::BeginBridgeDeploy => AgentStatus::DeployingBridge,
            Self::CompleteBridgeDeploy { .. } => AgentStatus::Published,
            Self::Fail { .. } => AgentStatus::Error,
        }
    }

    pub fn guard(&self) -> IdentifierGuard {
        match self {
            Self::BeginVoiceDeploy | Self::CompleteVoiceDeploy { .. } => IdentifierGuard::VoiceUnset,
            Self::BeginBridgeDeploy | Self::CompleteBridgeDeploy { .. } => {
                IdentifierGuard::VoiceSetBridgeUnset
            }
            Self::Fail { .. } => IdentifierGuard::Any,
        }
    }

    pub fn permits(&self, agent: &Agent) -> bool {
        self.expected_statuses().contains(&agent.status) && self.guard().holds(agent)
    }

    pub fn apply(&self, agent: &Agent, now: DateTime<Utc>) -> Result<Agent, DomainError> {
        if !self.permits(agent) {
            return Err(DomainError::InvalidState {
                agent_id: agent.id.0.clone(),
                violation: PhaseViolation::TransitionConflict {
                    transition: self.name(),
                    status: agent.status,
                },
            });
        }

        let mut next = agent.clone();
        next.status = self.target();
        next.updated_at = now;
        match self {
            Self::CompleteVoiceDeploy { voice_agent_id } => {
                next.elevenlabs_agent_id = Some(voice_agent_id.clone());
                next.deployed_at = Some(now);
            }
            Self::CompleteBridgeDeploy { app_id, deployment_url } => {
                next.digitalocean_app_id = Some(app_id.clone());
                next.deployment_url = Some(deployment_url.clone());
                next.deployed_at = Some(now);
            }
            Self::BeginVoiceDeploy | Self::BeginBridgeDeploy | Self::Fail { .. } => {}
        }
        Ok(next)
    }
}

/// Partial edit of the user-facing config. Never touches deployment columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigPatch {
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub react_flow_data: Option<Value>,
}

impl AgentConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.agent_name.is_none()
            && self.system_prompt.is_none()
            && self.voice_id.is_none()
            && self.first_message.is_none()
            && self.react_flow_data.is_none()
    }

    pub fn apply_to(&self, agent: &mut Agent, now: DateTime<Utc>) {
        if let Some(agent_name) = &self.agent_name {
            agent.agent_name = agent_name.clone();
        }
        if let Some(system_prompt) = &self.system_prompt {
            agent.system_prompt = system_prompt.clone();
        }
        if let Some(voice_id) = &self.voice_id {
            agent.voice_id = voice_id.clone();
        }
        if let Some(first_message) = &self.first_message {
            agent.first_message = first_message.clone();
        }
        if let Some(react_flow_data) = &self.react_flow_data {
            agent.react_flow_data = react_flow_data.clone();
        }
        agent.updated_at = now;
    }
}

use serde_json::Value;
use thiserror::Error;

use crate::domain::agent::AgentStatus;

/// Why a deployment phase may not start or continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PhaseViolation {
    AlreadyDeployed,
    NotDeployed,
    Phase1Required,
    AlreadyBridged,
    TransitionConflict { transition: &'static str, status: AgentStatus },
}

impl PhaseViolation {
    pub fn describe(&self) -> String {
        match self {
            Self::AlreadyDeployed => "agent is already deployed".to_string(),
            Self::NotDeployed => "agent has not been deployed yet".to_string(),
            Self::Phase1Required => {
                "agent must be deployed to the voice platform before deploying the bridge"
                    .to_string()
            }
            Self::AlreadyBridged => "bridge is already deployed for this agent".to_string(),
            Self::TransitionConflict { transition, status } => {
                format!("cannot {transition} while agent is {status}")
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid state for agent `{agent_id}`: {}", violation.describe())]
    InvalidState { agent_id: String, violation: PhaseViolation },
    #[error("agent `{agent_id}` is missing required config: {}", missing.join(", "))]
    IncompleteConfig { agent_id: String, missing: Vec<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    VoicePlatform,
    CloudPlatform,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VoicePlatform => "voice platform",
            Self::CloudPlatform => "cloud platform",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure talking to one of the third-party platforms.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProviderError {
    #[error("{provider} {operation} failed with status {status}")]
    Status { provider: Provider, operation: &'static str, status: u16, body: Value },
    #[error("{provider} {operation} request failed: {message}")]
    Transport { provider: Provider, operation: &'static str, message: String },
    #[error("{provider} {operation} returned an unexpected response: {message}")]
    Malformed { provider: Provider, operation: &'static str, message: String, body: Option<Value> },
}

impl ProviderError {
    /// Response body worth handing back to the caller, if any.
    pub fn detail(&self) -> Option<Value> {
        match self {
            Self::Status { body, .. } => Some(body.clone()),
            Self::Malformed { body, .. } => body.clone(),
            Self::Transport { message, .. } => Some(Value::String(message.clone())),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::Status { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Malformed { provider, .. } => *provider,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("app `{app_id}` was not live after {attempts} status checks")]
    ProvisioningTimeout { app_id: String, attempts: u32 },
    #[error("bridge provisioning was cancelled")]
    Cancelled { app_id: Option<String> },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, details: Option<Value>, correlation_id: String },
}

impl InterfaceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthenticated { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthenticated { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Internal { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthenticated { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthenticated { .. } => "A valid bearer token is required.",
            Self::Forbidden { .. } => "You do not have access to this agent.",
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::Conflict { .. } => "The resource already exists.",
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthenticated { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidState { violation, .. }) => {
                Self::BadRequest { message: violation.describe(), correlation_id }
            }
            ApplicationError::Domain(DomainError::IncompleteConfig { missing, .. }) => {
                Self::BadRequest {
                    message: format!("agent is missing required fields: {}", missing.join(", ")),
                    correlation_id,
                }
            }
            ApplicationError::InvalidInput(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::NotFound(what) => {
                Self::NotFound { message: format!("{what} not found"), correlation_id }
            }
            ApplicationError::Unauthorized(message) => Self::Forbidden { message, correlation_id },
            ApplicationError::Unauthenticated(message) => {
                Self::Unauthenticated { message, correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Provider(error) => Self::Internal {
                message: error.to_string(),
                details: error.detail(),
                correlation_id,
            },
            error @ (ApplicationError::ProvisioningTimeout { .. }
            | ApplicationError::Cancelled { .. }) => {
                Self::Internal { message: error.to_string(), details: None, correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::Internal { message, details: None, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::agent::AgentStatus;
    use crate::errors::{
        ApplicationError, DomainError, InterfaceError, PhaseViolation, Provider, ProviderError,
    };

    #[test]
    fn invalid_state_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::InvalidState {
            agent_id: "agent-1".to_owned(),
            violation: PhaseViolation::AlreadyDeployed,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, ref message }
                if correlation_id == "req-1" && message == "agent is already deployed"
        ));
        assert_eq!(interface.status_code(), 400);
    }

    #[test]
    fn incomplete_config_lists_missing_fields() {
        let interface = ApplicationError::from(DomainError::IncompleteConfig {
            agent_id: "agent-1".to_owned(),
            missing: vec!["system_prompt".to_owned(), "voice_id".to_owned()],
        })
        .into_interface("req-2");

        assert_eq!(interface.message(), "agent is missing required fields: system_prompt, voice_id");
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn provider_failure_carries_response_body() {
        let interface = ApplicationError::from(ProviderError::Status {
            provider: Provider::VoicePlatform,
            operation: "create agent",
            status: 422,
            body: json!({ "detail": "voice not found" }),
        })
        .into_interface("req-3");

        assert_eq!(interface.status_code(), 500);
        assert_eq!(interface.details(), Some(&json!({ "detail": "voice not found" })));
        assert_eq!(interface.message(), "voice platform create agent failed with status 422");
    }

    #[test]
    fn ownership_and_lookup_failures_map_to_403_and_404() {
        let forbidden =
            ApplicationError::Unauthorized("not the project owner".to_owned()).into_interface("r");
        let missing = ApplicationError::NotFound("agent `a-1`".to_owned()).into_interface("r");

        assert_eq!(forbidden.status_code(), 403);
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.message(), "agent `a-1` not found");
    }

    #[test]
    fn timeout_maps_to_internal_without_details() {
        let interface =
            ApplicationError::ProvisioningTimeout { app_id: "app-9".to_owned(), attempts: 60 }
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { details: None, .. }));
        assert_eq!(interface.message(), "app `app-9` was not live after 60 status checks");
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn transition_conflict_names_current_status() {
        let violation = PhaseViolation::TransitionConflict {
            transition: "begin_bridge_deploy",
            status: AgentStatus::DeployingBridge,
        };
        assert_eq!(violation.describe(), "cannot begin_bridge_deploy while agent is DEPLOYING_BRIDGE");
    }
}

pub mod auth;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod errors;

pub use auth::{AuthError, HmacTokenVerifier, TokenVerifier};
pub use deploy::{
    derive_application_name, AppSpec, AppStatus, ApplicationName, BridgeTemplate, CloudPlatform,
    PollPolicy, VoiceAgentDefinition, VoiceDefaults, VoicePlatform,
};
pub use domain::agent::{Agent, AgentConfigPatch, AgentId, AgentStatus, AgentTransition};
pub use domain::project::{Project, ProjectId, UserId};
pub use domain::tool::{AgentToolConnection, Tool, ToolConfigError, ToolId};
pub use errors::{
    ApplicationError, DomainError, InterfaceError, PhaseViolation, Provider, ProviderError,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use factory_core::domain::agent::{Agent, AgentConfigPatch, AgentId, AgentTransition};
use factory_core::domain::project::{Project, ProjectId};

pub mod agent;
pub mod memory;
pub mod project;

pub use agent::SqlAgentRepository;
pub use memory::{InMemoryAgentRepository, InMemoryProjectRepository};
pub use project::SqlProjectRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;
    async fn save(&self, project: Project) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn find_in_project(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
    ) -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_project(&self, project_id: &ProjectId)
        -> Result<Option<Agent>, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the project already has an agent.
    async fn insert(&self, agent: Agent) -> Result<(), RepositoryError>;

    /// Applies user-editable fields and returns the row after the write.
    async fn update_config(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
        patch: &AgentConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError>;

    /// Compare-and-set: writes only if the persisted row still satisfies the
    /// transition's expected statuses and identifier guard. `None` means no row matched.
    async fn apply_transition(
        &self,
        id: &AgentId,
        transition: &AgentTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError>;

    /// Records a successful config sync. Only `deployed_at` changes.
    async fn touch_deployed_at(
        &self,
        id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError>;
}

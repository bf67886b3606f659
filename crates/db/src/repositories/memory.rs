use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use factory_core::domain::agent::{Agent, AgentConfigPatch, AgentId, AgentTransition};
use factory_core::domain::project::{Project, ProjectId};

use super::{AgentRepository, ProjectRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryProjectRepository {
    projects: RwLock<HashMap<String, Project>>,
}

#[async_trait::async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let projects = self.projects.read().await;
        Ok(projects.get(&id.0).cloned())
    }

    async fn save(&self, project: Project) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write().await;
        projects.insert(project.id.0.clone(), project);
        Ok(())
    }
}

/// Agent store with the same compare-and-set semantics as the SQL repository.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn find_in_project(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
    ) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).filter(|agent| &agent.project_id == project_id).cloned())
    }

    async fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.values().find(|agent| &agent.project_id == project_id).cloned())
    }

    async fn insert(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id.0) {
            return Err(RepositoryError::Conflict(format!("agent `{}` already exists", agent.id)));
        }
        if agents.values().any(|existing| existing.project_id == agent.project_id) {
            return Err(RepositoryError::Conflict(format!(
                "project `{}` already has an agent",
                agent.project_id
            )));
        }
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }

    async fn update_config(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
        patch: &AgentConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id.0).filter(|agent| &agent.project_id == project_id)
        else {
            return Ok(None);
        };
        patch.apply_to(agent, now);
        Ok(Some(agent.clone()))
    }

    async fn apply_transition(
        &self,
        id: &AgentId,
        transition: &AgentTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id.0) else {
            return Ok(None);
        };
        match transition.apply(agent, now) {
            Ok(next) => {
                *agent = next.clone();
                Ok(Some(next))
            }
            Err(_) => Ok(None),
        }
    }

    async fn touch_deployed_at(
        &self,
        id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id.0).filter(|agent| agent.is_voice_deployed()) else {
            return Ok(None);
        };
        agent.deployed_at = Some(now);
        Ok(Some(agent.clone()))
    }
}

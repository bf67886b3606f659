use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;

use factory_core::config::AppConfig;
use factory_core::deploy::{
    derive_application_name, BridgeTemplate, CloudPlatform, PollPolicy, VoiceAgentDefinition,
    VoiceDefaults, VoicePlatform,
};
use factory_core::domain::agent::{Agent, AgentConfigPatch, AgentId, AgentStatus, AgentTransition};
use factory_core::domain::project::{Project, ProjectId, UserId};
use factory_core::errors::{ApplicationError, DomainError, PhaseViolation};
use factory_db::repositories::{AgentRepository, ProjectRepository, RepositoryError};

use crate::poller::wait_until_live;
use crate::tasks::{BridgeTasks, Registration};

/// Static inputs to every deploy, resolved once from configuration.
#[derive(Clone, Debug)]
pub struct DeploySettings {
    pub voice_defaults: VoiceDefaults,
    pub bridge_template: BridgeTemplate,
    pub voice_api_key: SecretString,
    pub poll_policy: PollPolicy,
}

impl DeploySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            voice_defaults: VoiceDefaults::from_config(&config.voice),
            bridge_template: BridgeTemplate::from_config(&config.cloud),
            voice_api_key: config.voice.api_key.clone(),
            poll_policy: PollPolicy::from_config(&config.cloud),
        }
    }
}

/// Who is calling and the id their log lines and errors are stamped with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, correlation_id: format!("req-{}", uuid::Uuid::new_v4()) }
    }

    pub fn with_correlation_id(user_id: UserId, correlation_id: impl Into<String>) -> Self {
        Self { user_id, correlation_id: correlation_id.into() }
    }
}

/// Drives agents through the voice platform and bridge phases.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    agents: Arc<dyn AgentRepository>,
    projects: Arc<dyn ProjectRepository>,
    voice: Arc<dyn VoicePlatform>,
    cloud: Arc<dyn CloudPlatform>,
    settings: Arc<DeploySettings>,
    tasks: BridgeTasks,
}

impl DeploymentOrchestrator {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        projects: Arc<dyn ProjectRepository>,
        voice: Arc<dyn VoicePlatform>,
        cloud: Arc<dyn CloudPlatform>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            agents,
            projects,
            voice,
            cloud,
            settings: Arc::new(settings),
            tasks: BridgeTasks::new(),
        }
    }

    pub fn tasks(&self) -> &BridgeTasks {
        &self.tasks
    }

    /// Creates the project's single agent in `DRAFT`.
    pub async fn create_agent(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        fields: AgentConfigPatch,
    ) -> Result<Agent, ApplicationError> {
        self.owned_project(ctx, project_id).await?;

        let name = fields.agent_name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ApplicationError::InvalidInput("agent_name is required".to_string()));
        }

        let now = Utc::now();
        let mut agent = Agent::new_draft(AgentId::generate(), project_id.clone(), name, now);
        fields.apply_to(&mut agent, now);
        agent.agent_name = name.to_string();

        self.agents.insert(agent.clone()).await.map_err(repository_error)?;
        tracing::info!(
            event_name = "agent.created",
            correlation_id = %ctx.correlation_id,
            agent_id = %agent.id,
            project_id = %project_id,
            "agent created"
        );
        Ok(agent)
    }

    /// Saves config edits locally. The platforms only see them on the next deploy or sync.
    pub async fn update_config(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        agent_id: &AgentId,
        patch: AgentConfigPatch,
    ) -> Result<Agent, ApplicationError> {
        if patch.is_empty() {
            return Err(ApplicationError::InvalidInput(
                "at least one field must be provided".to_string(),
            ));
        }
        self.owned_project(ctx, project_id).await?;

        self.agents
            .update_config(agent_id, project_id, &patch, Utc::now())
            .await
            .map_err(repository_error)?
            .ok_or_else(|| agent_not_found(agent_id))
    }

    pub async fn project_agent(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
    ) -> Result<Agent, ApplicationError> {
        self.owned_project(ctx, project_id).await?;
        self.agents
            .find_by_project(project_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ApplicationError::NotFound(format!("agent for project `{project_id}`")))
    }

    pub async fn agent(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        self.owned_agent_by_id(ctx, agent_id).await
    }

    /// Phase 1: registers the agent with the voice platform.
    pub async fn deploy_agent(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        let agent = self.owned_agent(ctx, project_id, agent_id).await?;
        agent.ensure_can_deploy_voice()?;

        let deploying = self.transition(&agent.id, AgentTransition::BeginVoiceDeploy).await?;
        tracing::info!(
            event_name = "deploy.voice.started",
            correlation_id = %ctx.correlation_id,
            agent_id = %agent.id,
            "deploying agent to voice platform"
        );

        let definition = VoiceAgentDefinition::from_agent(&deploying, &self.settings.voice_defaults);
        let voice_agent_id = match self.voice.create_agent(&definition).await {
            Ok(voice_agent_id) => voice_agent_id,
            Err(error) => {
                tracing::error!(
                    event_name = "deploy.voice.failed",
                    correlation_id = %ctx.correlation_id,
                    agent_id = %agent.id,
                    error = %error,
                    "voice platform rejected the agent"
                );
                self.mark_failed(ctx, &agent.id, AgentStatus::Deploying).await;
                return Err(error.into());
            }
        };

        let completed = self
            .transition(
                &agent.id,
                AgentTransition::CompleteVoiceDeploy { voice_agent_id: voice_agent_id.clone() },
            )
            .await;
        let active = match completed {
            Ok(active) => active,
            Err(error) => {
                tracing::error!(
                    event_name = "deploy.voice.record_failed",
                    correlation_id = %ctx.correlation_id,
                    agent_id = %agent.id,
                    voice_agent_id = %voice_agent_id,
                    error = %error,
                    "voice agent was created but could not be recorded"
                );
                self.mark_failed(ctx, &agent.id, AgentStatus::Deploying).await;
                return Err(error);
            }
        };
        tracing::info!(
            event_name = "deploy.voice.completed",
            correlation_id = %ctx.correlation_id,
            agent_id = %agent.id,
            voice_agent_id = %voice_agent_id,
            "agent is active on the voice platform"
        );
        Ok(active)
    }

    /// Pushes the stored config to an already deployed voice agent. Only `deployed_at`
    /// changes locally and a failed push leaves the status alone.
    pub async fn update_deployed_agent(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        let agent = self.owned_agent(ctx, project_id, agent_id).await?;
        let voice_agent_id = agent.ensure_can_sync_voice()?;

        let definition = VoiceAgentDefinition::from_agent(&agent, &self.settings.voice_defaults);
        if let Err(error) = self.voice.update_agent(voice_agent_id, &definition).await {
            tracing::warn!(
                event_name = "deploy.voice.sync_failed",
                correlation_id = %ctx.correlation_id,
                agent_id = %agent.id,
                error = %error,
                "voice platform rejected the config update"
            );
            return Err(error.into());
        }

        let synced = self
            .agents
            .touch_deployed_at(&agent.id, Utc::now())
            .await
            .map_err(repository_error)?
            .ok_or_else(|| agent_not_found(&agent.id))?;
        tracing::info!(
            event_name = "deploy.voice.synced",
            correlation_id = %ctx.correlation_id,
            agent_id = %agent.id,
            "voice platform config updated"
        );
        Ok(synced)
    }

    /// Phase 2, waiting for the bridge to go live.
    ///
    /// Provisioning runs on its own task so a dropped request cannot strand the agent in
    /// `DEPLOYING_BRIDGE`.
    pub async fn deploy_bridge(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        let (deploying, request) = self.begin_bridge(ctx, agent_id).await?;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.provision_bridge(request).await });

        match handle.await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(
                    event_name = "deploy.bridge.task_failed",
                    correlation_id = %ctx.correlation_id,
                    agent_id = %deploying.id,
                    error = %error,
                    "bridge provisioning task did not complete"
                );
                self.mark_failed(ctx, &deploying.id, AgentStatus::DeployingBridge).await;
                Err(ApplicationError::Cancelled { app_id: None })
            }
        }
    }

    /// Phase 2 without waiting. Returns the agent in `DEPLOYING_BRIDGE`; progress is
    /// visible by reading the agent.
    pub async fn start_bridge_deploy(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        let (deploying, request) = self.begin_bridge(ctx, agent_id).await?;
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.provision_bridge(request).await;
        });
        Ok(deploying)
    }

    /// Returns `false` when no provisioning attempt is running for the agent.
    pub async fn cancel_bridge_deploy(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<bool, ApplicationError> {
        self.owned_agent_by_id(ctx, agent_id).await?;
        let cancelled = self.tasks.cancel(agent_id);
        if cancelled {
            tracing::info!(
                event_name = "deploy.bridge.cancel_requested",
                correlation_id = %ctx.correlation_id,
                agent_id = %agent_id,
                "bridge provisioning cancellation requested"
            );
        }
        Ok(cancelled)
    }

    async fn begin_bridge(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<(Agent, BridgeRequest), ApplicationError> {
        let agent = self.owned_agent_by_id(ctx, agent_id).await?;
        let voice_agent_id = agent.ensure_can_deploy_bridge()?.to_string();

        let app_name = derive_application_name(&agent.agent_name, agent.id.as_str());
        let spec = self.settings.bridge_template.app_spec(
            &app_name,
            &self.settings.voice_api_key,
            &voice_agent_id,
        );

        let deploying = self.transition(&agent.id, AgentTransition::BeginBridgeDeploy).await?;
        let registration = self.tasks.register(&agent.id);
        tracing::info!(
            event_name = "deploy.bridge.started",
            correlation_id = %ctx.correlation_id,
            agent_id = %agent.id,
            app_name = %app_name,
            poll_budget_secs = self.settings.poll_policy.budget().as_secs(),
            "deploying bridge service"
        );

        Ok((
            deploying,
            BridgeRequest { ctx: ctx.clone(), agent_id: agent.id, spec, registration },
        ))
    }

    async fn provision_bridge(&self, request: BridgeRequest) -> Result<Agent, ApplicationError> {
        let BridgeRequest { ctx, agent_id, spec, registration } = request;
        let Registration { mut signal, guard: _guard } = registration;

        let outcome = async {
            if signal.is_cancelled() {
                return Err(ApplicationError::Cancelled { app_id: None });
            }

            let app_id = self.cloud.create_app(&spec).await?;
            tracing::info!(
                event_name = "deploy.bridge.app_created",
                correlation_id = %ctx.correlation_id,
                agent_id = %agent_id,
                app_id = %app_id,
                "cloud app created, waiting for it to go live"
            );

            let deployment_url =
                wait_until_live(self.cloud.as_ref(), &app_id, self.settings.poll_policy, &mut signal)
                    .await?;
            Ok::<_, ApplicationError>((app_id, deployment_url))
        }
        .await;

        match outcome {
            Ok((app_id, deployment_url)) => {
                let completed = self
                    .transition(
                        &agent_id,
                        AgentTransition::CompleteBridgeDeploy {
                            app_id: app_id.clone(),
                            deployment_url: deployment_url.clone(),
                        },
                    )
                    .await;
                let published = match completed {
                    Ok(published) => published,
                    Err(error) => {
                        tracing::error!(
                            event_name = "deploy.bridge.record_failed",
                            correlation_id = %ctx.correlation_id,
                            agent_id = %agent_id,
                            app_id = %app_id,
                            error = %error,
                            "bridge is live but could not be recorded"
                        );
                        self.mark_failed(&ctx, &agent_id, AgentStatus::DeployingBridge).await;
                        return Err(error);
                    }
                };
                tracing::info!(
                    event_name = "deploy.bridge.completed",
                    correlation_id = %ctx.correlation_id,
                    agent_id = %agent_id,
                    app_id = %app_id,
                    deployment_url = %deployment_url,
                    "bridge is live"
                );
                Ok(published)
            }
            Err(error) => {
                tracing::error!(
                    event_name = "deploy.bridge.failed",
                    correlation_id = %ctx.correlation_id,
                    agent_id = %agent_id,
                    error = %error,
                    "bridge provisioning failed"
                );
                self.mark_failed(&ctx, &agent_id, AgentStatus::DeployingBridge).await;
                Err(error)
            }
        }
    }

    async fn owned_project(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
    ) -> Result<Project, ApplicationError> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ApplicationError::NotFound(format!("project `{project_id}`")))?;

        if !project.is_owned_by(&ctx.user_id) {
            tracing::warn!(
                event_name = "auth.project_forbidden",
                correlation_id = %ctx.correlation_id,
                project_id = %project_id,
                user_id = %ctx.user_id,
                "caller does not own the project"
            );
            return Err(ApplicationError::Unauthorized(format!(
                "project `{project_id}` belongs to another user"
            )));
        }
        Ok(project)
    }

    async fn owned_agent(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        self.owned_project(ctx, project_id).await?;
        self.agents
            .find_in_project(agent_id, project_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| agent_not_found(agent_id))
    }

    async fn owned_agent_by_id(
        &self,
        ctx: &RequestContext,
        agent_id: &AgentId,
    ) -> Result<Agent, ApplicationError> {
        let agent = self
            .agents
            .find_by_id(agent_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| agent_not_found(agent_id))?;
        self.owned_project(ctx, &agent.project_id).await?;
        Ok(agent)
    }

    /// Compare-and-set. A lost race is reported against the status found afterwards.
    async fn transition(
        &self,
        agent_id: &AgentId,
        transition: AgentTransition,
    ) -> Result<Agent, ApplicationError> {
        let applied = self
            .agents
            .apply_transition(agent_id, &transition, Utc::now())
            .await
            .map_err(repository_error)?;
        if let Some(agent) = applied {
            return Ok(agent);
        }

        let current = self
            .agents
            .find_by_id(agent_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| agent_not_found(agent_id))?;
        Err(DomainError::InvalidState {
            agent_id: agent_id.0.clone(),
            violation: PhaseViolation::TransitionConflict {
                transition: transition.name(),
                status: current.status,
            },
        }
        .into())
    }

    /// Best effort: the original failure is what the caller needs to see.
    async fn mark_failed(&self, ctx: &RequestContext, agent_id: &AgentId, from: AgentStatus) {
        match self.agents.apply_transition(agent_id, &AgentTransition::Fail { from }, Utc::now()).await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                event_name = "deploy.mark_failed.skipped",
                correlation_id = %ctx.correlation_id,
                agent_id = %agent_id,
                expected = %from,
                "agent status moved before it could be marked as failed"
            ),
            Err(error) => tracing::error!(
                event_name = "deploy.mark_failed.error",
                correlation_id = %ctx.correlation_id,
                agent_id = %agent_id,
                error = %error,
                "could not record failed deployment"
            ),
        }
    }
}

struct BridgeRequest {
    ctx: RequestContext,
    agent_id: AgentId,
    spec: factory_core::deploy::AppSpec,
    registration: Registration,
}

fn agent_not_found(agent_id: &AgentId) -> ApplicationError {
    ApplicationError::NotFound(format!("agent `{agent_id}`"))
}

fn repository_error(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::Conflict(message) => ApplicationError::Conflict(message),
        other => ApplicationError::Persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use serde_json::json;

    use factory_core::config::AppConfig;
    use factory_core::deploy::{AppStatus, PollPolicy};
    use factory_core::domain::agent::{
        Agent, AgentConfigPatch, AgentId, AgentStatus, AgentTransition,
    };
    use factory_core::domain::project::{Project, ProjectId, UserId};
    use factory_core::errors::{
        ApplicationError, DomainError, PhaseViolation, Provider, ProviderError,
    };
    use factory_db::repositories::{
        AgentRepository, InMemoryAgentRepository, InMemoryProjectRepository, ProjectRepository,
        RepositoryError,
    };

    use super::{DeploySettings, DeploymentOrchestrator, RequestContext};
    use crate::fakes::{ScriptedCloudPlatform, ScriptedVoicePlatform, VoiceCall};

    struct Harness {
        orchestrator: DeploymentOrchestrator,
        agents: Arc<InMemoryAgentRepository>,
        voice: ScriptedVoicePlatform,
        cloud: ScriptedCloudPlatform,
        ctx: RequestContext,
        project_id: ProjectId,
    }

    impl Harness {
        async fn new(voice: ScriptedVoicePlatform, cloud: ScriptedCloudPlatform) -> Self {
            Self::with_agent_store(voice, cloud, |agents| agents as Arc<dyn AgentRepository>)
                .await
        }

        /// `store` wraps the in-memory agents the orchestrator writes through.
        async fn with_agent_store(
            voice: ScriptedVoicePlatform,
            cloud: ScriptedCloudPlatform,
            store: impl FnOnce(Arc<InMemoryAgentRepository>) -> Arc<dyn AgentRepository>,
        ) -> Self {
            let agents = Arc::new(InMemoryAgentRepository::default());
            let projects = Arc::new(InMemoryProjectRepository::default());
            let project_id = ProjectId("proj-1".to_string());
            projects
                .save(Project {
                    id: project_id.clone(),
                    user_id: UserId("user-1".to_string()),
                    name: "Front desk".to_string(),
                    created_at: Utc::now(),
                })
                .await
                .expect("save project");

            let mut settings = DeploySettings::from_config(&AppConfig::default());
            settings.voice_api_key = "xi-test-key".to_string().into();
            settings.poll_policy =
                PollPolicy { interval: Duration::from_millis(1), max_attempts: 60 };

            let orchestrator = DeploymentOrchestrator::new(
                store(agents.clone()),
                projects,
                Arc::new(voice.clone()),
                Arc::new(cloud.clone()),
                settings,
            );

            Self {
                orchestrator,
                agents,
                voice,
                cloud,
                ctx: RequestContext::with_correlation_id(UserId("user-1".to_string()), "req-test"),
                project_id,
            }
        }

        async fn seed(&self, configure: impl FnOnce(&mut Agent)) -> Agent {
            let mut agent = Agent::new_draft(
                AgentId("3f9a1c7e-0000-4000-8000-000000000001".to_string()),
                self.project_id.clone(),
                "Front Desk",
                Utc::now(),
            );
            agent.system_prompt = "Greet hotel guests.".to_string();
            agent.voice_id = "voice-rachel".to_string();
            configure(&mut agent);
            self.agents.insert(agent.clone()).await.expect("insert agent");
            agent
        }

        async fn stored(&self, id: &AgentId) -> Agent {
            self.agents.find_by_id(id).await.expect("find").expect("agent exists")
        }
    }

    /// Rejects the writes that record a finished phase.
    struct CompletionWritesFail {
        inner: Arc<InMemoryAgentRepository>,
    }

    #[async_trait::async_trait]
    impl AgentRepository for CompletionWritesFail {
        async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_in_project(
            &self,
            id: &AgentId,
            project_id: &ProjectId,
        ) -> Result<Option<Agent>, RepositoryError> {
            self.inner.find_in_project(id, project_id).await
        }

        async fn find_by_project(
            &self,
            project_id: &ProjectId,
        ) -> Result<Option<Agent>, RepositoryError> {
            self.inner.find_by_project(project_id).await
        }

        async fn insert(&self, agent: Agent) -> Result<(), RepositoryError> {
            self.inner.insert(agent).await
        }

        async fn update_config(
            &self,
            id: &AgentId,
            project_id: &ProjectId,
            patch: &AgentConfigPatch,
            now: DateTime<Utc>,
        ) -> Result<Option<Agent>, RepositoryError> {
            self.inner.update_config(id, project_id, patch, now).await
        }

        async fn apply_transition(
            &self,
            id: &AgentId,
            transition: &AgentTransition,
            now: DateTime<Utc>,
        ) -> Result<Option<Agent>, RepositoryError> {
            if matches!(
                transition,
                AgentTransition::CompleteVoiceDeploy { .. }
                    | AgentTransition::CompleteBridgeDeploy { .. }
            ) {
                return Err(RepositoryError::Decode("transient write failure".to_string()));
            }
            self.inner.apply_transition(id, transition, now).await
        }

        async fn touch_deployed_at(
            &self,
            id: &AgentId,
            now: DateTime<Utc>,
        ) -> Result<Option<Agent>, RepositoryError> {
            self.inner.touch_deployed_at(id, now).await
        }
    }

    fn failing_completions(agents: Arc<InMemoryAgentRepository>) -> Arc<dyn AgentRepository> {
        Arc::new(CompletionWritesFail { inner: agents })
    }

    fn provider_failure(provider: Provider, operation: &'static str) -> ProviderError {
        ProviderError::Status {
            provider,
            operation,
            status: 422,
            body: json!({"detail": "invalid voice"}),
        }
    }

    #[tokio::test]
    async fn deploy_agent_activates_with_the_returned_id() {
        let harness = Harness::new(
            ScriptedVoicePlatform::new().with_create_results([Ok("eid-1".to_string())]),
            ScriptedCloudPlatform::new(),
        )
        .await;
        let agent = harness.seed(|_| {}).await;
        let started = Utc::now();

        let deployed = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect("deploy");

        assert_eq!(deployed.status, AgentStatus::Active);
        assert_eq!(deployed.elevenlabs_agent_id.as_deref(), Some("eid-1"));
        assert!(deployed.deployed_at.expect("deployed_at") >= started);
        assert_eq!(harness.stored(&agent.id).await, deployed);

        let calls = harness.voice.calls();
        let VoiceCall::Create(definition) = &calls[0] else {
            panic!("expected a create call, got {calls:?}");
        };
        assert_eq!(definition.name, "Front Desk");
        assert_eq!(definition.conversation_config.agent.first_message, "Hello! How can I help you?");
        assert_eq!(definition.conversation_config.agent.language, "en");
        assert_eq!(definition.conversation_config.tts.voice_id, "voice-rachel");
    }

    #[tokio::test]
    async fn deploy_agent_twice_is_rejected_without_calls_or_writes() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-0".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let error = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("already deployed");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidState {
                violation: PhaseViolation::AlreadyDeployed,
                ..
            })
        ));
        assert_eq!(harness.voice.create_calls(), 0);
        assert_eq!(harness.stored(&agent.id).await, agent);
    }

    #[tokio::test]
    async fn deploy_agent_with_missing_config_makes_no_call() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness.seed(|agent| agent.voice_id = "  ".to_string()).await;

        let error = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("incomplete");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::IncompleteConfig {
                agent_id: agent.id.0.clone(),
                missing: vec!["voice_id".to_string()],
            })
        );
        assert_eq!(harness.voice.create_calls(), 0);
        assert_eq!(harness.stored(&agent.id).await.status, AgentStatus::Draft);
    }

    #[tokio::test]
    async fn provider_failure_marks_the_agent_errored() {
        let failure = provider_failure(Provider::VoicePlatform, "agent create");
        let harness = Harness::new(
            ScriptedVoicePlatform::new().with_create_results([Err(failure.clone())]),
            ScriptedCloudPlatform::new(),
        )
        .await;
        let agent = harness.seed(|_| {}).await;

        let error = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("provider failure");

        assert_eq!(error, ApplicationError::Provider(failure));
        let stored = harness.stored(&agent.id).await;
        assert_eq!(stored.status, AgentStatus::Error);
        assert_eq!(stored.elevenlabs_agent_id, None);
    }

    #[tokio::test]
    async fn errored_agent_can_retry_phase_one() {
        let harness = Harness::new(
            ScriptedVoicePlatform::new().with_create_results([
                Err(provider_failure(Provider::VoicePlatform, "agent create")),
                Ok("eid-2".to_string()),
            ]),
            ScriptedCloudPlatform::new(),
        )
        .await;
        let agent = harness.seed(|_| {}).await;

        harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("first attempt fails");
        let retried = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect("retry succeeds");

        assert_eq!(retried.status, AgentStatus::Active);
        assert_eq!(retried.elevenlabs_agent_id.as_deref(), Some("eid-2"));
    }

    #[tokio::test]
    async fn other_users_cannot_deploy() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness.seed(|_| {}).await;
        let intruder = RequestContext::new(UserId("user-2".to_string()));

        let error = harness
            .orchestrator
            .deploy_agent(&intruder, &harness.project_id, &agent.id)
            .await
            .expect_err("forbidden");

        assert!(matches!(error, ApplicationError::Unauthorized(_)));
        assert_eq!(harness.voice.create_calls(), 0);
    }

    #[tokio::test]
    async fn config_sync_twice_only_moves_deployed_at() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Published;
                agent.digitalocean_app_id = Some("app-9".to_string());
                agent.deployment_url = Some("https://bridge.example".to_string());
            })
            .await;

        let first = harness
            .orchestrator
            .update_deployed_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect("first sync");
        let second = harness
            .orchestrator
            .update_deployed_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect("second sync");

        assert_eq!(harness.voice.update_calls(), 2);
        assert!(second.deployed_at >= first.deployed_at);
        let mut expected = agent.clone();
        expected.deployed_at = second.deployed_at;
        assert_eq!(second, expected);
        assert!(harness
            .voice
            .calls()
            .iter()
            .all(|call| matches!(call, VoiceCall::Update { voice_agent_id, .. } if voice_agent_id == "eid-1")));
    }

    #[tokio::test]
    async fn config_sync_failure_keeps_status() {
        let failure = provider_failure(Provider::VoicePlatform, "agent update");
        let harness = Harness::new(
            ScriptedVoicePlatform::new().with_update_results([Err(failure.clone())]),
            ScriptedCloudPlatform::new(),
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let error = harness
            .orchestrator
            .update_deployed_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("sync fails");

        assert_eq!(error, ApplicationError::Provider(failure));
        assert_eq!(harness.stored(&agent.id).await, agent);
    }

    #[tokio::test]
    async fn config_sync_requires_phase_one() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness.seed(|_| {}).await;

        let error = harness
            .orchestrator
            .update_deployed_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("not deployed");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidState {
                violation: PhaseViolation::NotDeployed,
                ..
            })
        ));
        assert_eq!(harness.voice.update_calls(), 0);
    }

    #[tokio::test]
    async fn bridge_without_phase_one_never_calls_the_cloud() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness.seed(|_| {}).await;

        let error = harness
            .orchestrator
            .deploy_bridge(&harness.ctx, &agent.id)
            .await
            .expect_err("phase one required");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidState {
                violation: PhaseViolation::Phase1Required,
                ..
            })
        ));
        assert_eq!(harness.cloud.create_calls(), 0);
        assert_eq!(harness.stored(&agent.id).await, agent);
        assert!(!harness.orchestrator.tasks().is_running(&agent.id));
    }

    #[tokio::test]
    async fn bridge_publishes_once_the_app_is_live() {
        let harness = Harness::new(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new()
                .with_create_results([Ok("app-42".to_string())])
                .with_statuses([Ok(AppStatus::pending("BUILDING"))])
                .with_default_status(AppStatus::live("https://front-desk.ondigitalocean.app")),
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;
        let started = Utc::now();

        let published =
            harness.orchestrator.deploy_bridge(&harness.ctx, &agent.id).await.expect("bridge");

        assert_eq!(published.status, AgentStatus::Published);
        assert_eq!(published.digitalocean_app_id.as_deref(), Some("app-42"));
        assert_eq!(
            published.deployment_url.as_deref(),
            Some("https://front-desk.ondigitalocean.app")
        );
        assert!(published.deployed_at.expect("deployed_at") >= started);
        assert_eq!(harness.cloud.status_calls(), 2);

        let specs = harness.cloud.created_specs();
        assert_eq!(specs[0].name, "front-desk");
        let envs = &specs[0].services[0].envs;
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[1].value, "eid-1");
        assert!(!harness.orchestrator.tasks().is_running(&agent.id));
    }

    #[tokio::test]
    async fn unrecorded_voice_deploy_leaves_the_agent_retryable() {
        let harness = Harness::with_agent_store(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new(),
            failing_completions,
        )
        .await;
        let agent = harness.seed(|_| {}).await;

        let error = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("completion write fails");
        assert!(matches!(error, ApplicationError::Persistence(_)), "unexpected error: {error:?}");

        let stored = harness.stored(&agent.id).await;
        assert_eq!(stored.status, AgentStatus::Error);
        assert_eq!(stored.elevenlabs_agent_id, None);

        let retry = harness
            .orchestrator
            .deploy_agent(&harness.ctx, &harness.project_id, &agent.id)
            .await
            .expect_err("completion write still fails");
        assert!(matches!(retry, ApplicationError::Persistence(_)), "retry was blocked: {retry:?}");
        assert_eq!(harness.voice.create_calls(), 2);
        assert_eq!(harness.stored(&agent.id).await.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn unrecorded_bridge_deploy_marks_the_agent_errored() {
        let harness = Harness::with_agent_store(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new()
                .with_create_results([Ok("app-42".to_string())])
                .with_default_status(AppStatus::live("https://front-desk.ondigitalocean.app")),
            failing_completions,
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let error = harness
            .orchestrator
            .deploy_bridge(&harness.ctx, &agent.id)
            .await
            .expect_err("completion write fails");
        assert!(matches!(error, ApplicationError::Persistence(_)), "unexpected error: {error:?}");

        let stored = harness.stored(&agent.id).await;
        assert_eq!(stored.status, AgentStatus::Error);
        assert_eq!(stored.digitalocean_app_id, None);
        assert_eq!(stored.elevenlabs_agent_id.as_deref(), Some("eid-1"));
        assert!(!harness.orchestrator.tasks().is_running(&agent.id));
    }

    #[tokio::test]
    async fn bridge_timeout_marks_the_agent_errored() {
        let harness = Harness::new(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new()
                .with_create_results([Ok("app-7".to_string())])
                .with_default_status(AppStatus::pending("BUILDING")),
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let error =
            harness.orchestrator.deploy_bridge(&harness.ctx, &agent.id).await.expect_err("timeout");

        assert_eq!(
            error,
            ApplicationError::ProvisioningTimeout { app_id: "app-7".to_string(), attempts: 60 }
        );
        assert_eq!(harness.cloud.status_calls(), 60);
        let stored = harness.stored(&agent.id).await;
        assert_eq!(stored.status, AgentStatus::Error);
        assert_eq!(stored.digitalocean_app_id, None);
        assert_eq!(stored.elevenlabs_agent_id.as_deref(), Some("eid-1"));
    }

    #[tokio::test]
    async fn bridge_create_failure_marks_the_agent_errored() {
        let failure = provider_failure(Provider::CloudPlatform, "app create");
        let harness = Harness::new(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new().with_create_results([Err(failure.clone())]),
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let error =
            harness.orchestrator.deploy_bridge(&harness.ctx, &agent.id).await.expect_err("fails");

        assert_eq!(error, ApplicationError::Provider(failure));
        assert_eq!(harness.cloud.status_calls(), 0);
        assert_eq!(harness.stored(&agent.id).await.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn background_bridge_returns_immediately_and_can_be_cancelled() {
        let harness = Harness::new(
            ScriptedVoicePlatform::new(),
            ScriptedCloudPlatform::new()
                .with_create_delay(Duration::from_millis(10))
                .with_default_status(AppStatus::pending("BUILDING")),
        )
        .await;
        let agent = harness
            .seed(|agent| {
                agent.elevenlabs_agent_id = Some("eid-1".to_string());
                agent.status = AgentStatus::Active;
            })
            .await;

        let mut slow = DeploySettings::from_config(&AppConfig::default());
        slow.poll_policy = PollPolicy { interval: Duration::from_secs(30), max_attempts: 60 };
        let orchestrator = DeploymentOrchestrator {
            settings: Arc::new(slow),
            ..harness.orchestrator.clone()
        };

        let deploying = orchestrator
            .start_bridge_deploy(&harness.ctx, &agent.id)
            .await
            .expect("background start");
        assert_eq!(deploying.status, AgentStatus::DeployingBridge);
        assert!(orchestrator.tasks().is_running(&agent.id));

        let again = orchestrator
            .start_bridge_deploy(&harness.ctx, &agent.id)
            .await
            .expect_err("already in flight");
        assert!(matches!(
            again,
            ApplicationError::Domain(DomainError::InvalidState {
                violation: PhaseViolation::TransitionConflict { .. },
                ..
            })
        ));
        assert!(orchestrator.tasks().is_running(&agent.id));

        assert!(orchestrator
            .cancel_bridge_deploy(&harness.ctx, &agent.id)
            .await
            .expect("cancel"));
        assert!(orchestrator.tasks().shutdown(Duration::from_secs(5)).await);

        let stored = harness.stored(&agent.id).await;
        assert_eq!(stored.status, AgentStatus::Error);
        assert_eq!(stored.digitalocean_app_id, None);
        assert!(!orchestrator
            .cancel_bridge_deploy(&harness.ctx, &agent.id)
            .await
            .expect("nothing to cancel"));
    }

    #[tokio::test]
    async fn create_agent_enforces_one_per_project() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let fields = AgentConfigPatch {
            agent_name: Some("  Concierge ".to_string()),
            ..AgentConfigPatch::default()
        };

        let created = harness
            .orchestrator
            .create_agent(&harness.ctx, &harness.project_id, fields.clone())
            .await
            .expect("create");
        assert_eq!(created.agent_name, "Concierge");
        assert_eq!(created.status, AgentStatus::Draft);

        let error = harness
            .orchestrator
            .create_agent(&harness.ctx, &harness.project_id, fields)
            .await
            .expect_err("duplicate");
        assert!(matches!(error, ApplicationError::Conflict(_)));

        let missing_name = harness
            .orchestrator
            .create_agent(&harness.ctx, &harness.project_id, AgentConfigPatch::default())
            .await
            .expect_err("name required");
        assert!(matches!(missing_name, ApplicationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_config_rejects_empty_patches() {
        let harness = Harness::new(ScriptedVoicePlatform::new(), ScriptedCloudPlatform::new()).await;
        let agent = harness.seed(|_| {}).await;

        let error = harness
            .orchestrator
            .update_config(&harness.ctx, &harness.project_id, &agent.id, AgentConfigPatch::default())
            .await
            .expect_err("empty");
        assert!(matches!(error, ApplicationError::InvalidInput(_)));

        let updated = harness
            .orchestrator
            .update_config(
                &harness.ctx,
                &harness.project_id,
                &agent.id,
                AgentConfigPatch {
                    first_message: Some("Welcome to the hotel.".to_string()),
                    ..AgentConfigPatch::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.first_message, "Welcome to the hotel.");
        assert_eq!(updated.system_prompt, agent.system_prompt);
        assert_eq!(harness.voice.calls(), Vec::new());
    }
}

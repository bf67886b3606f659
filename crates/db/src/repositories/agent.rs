use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use factory_core::domain::agent::{
    Agent, AgentConfigPatch, AgentId, AgentStatus, AgentTransition, IdentifierGuard,
};
use factory_core::domain::project::ProjectId;

use super::{AgentRepository, RepositoryError};
use crate::DbPool;

const AGENT_COLUMNS: &str = "id,
                project_id,
                agent_name,
                system_prompt,
                voice_id,
                first_message,
                react_flow_data,
                status,
                elevenlabs_agent_id,
                digitalocean_app_id,
                deployment_url,
                deployed_at,
                created_at,
                updated_at";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agent WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(agent_from_row).transpose()
    }

    async fn find_in_project(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent WHERE id = ? AND project_id = ?"
        ))
        .bind(&id.0)
        .bind(&project_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }

    async fn find_by_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agent WHERE project_id = ?"))
            .bind(&project_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(agent_from_row).transpose()
    }

    async fn insert(&self, agent: Agent) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO agent (
                id,
                project_id,
                agent_name,
                system_prompt,
                voice_id,
                first_message,
                react_flow_data,
                status,
                elevenlabs_agent_id,
                digitalocean_app_id,
                deployment_url,
                deployed_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id.0)
        .bind(&agent.project_id.0)
        .bind(&agent.agent_name)
        .bind(&agent.system_prompt)
        .bind(&agent.voice_id)
        .bind(&agent.first_message)
        .bind(agent.react_flow_data.to_string())
        .bind(agent.status.as_str())
        .bind(agent.elevenlabs_agent_id.as_deref())
        .bind(agent.digitalocean_app_id.as_deref())
        .bind(agent.deployment_url.as_deref())
        .bind(agent.deployed_at.map(|value| value.to_rfc3339()))
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "project `{}` already has an agent",
                    agent.project_id.0
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update_config(
        &self,
        id: &AgentId,
        project_id: &ProjectId,
        patch: &AgentConfigPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE agent SET
                agent_name = COALESCE(?, agent_name),
                system_prompt = COALESCE(?, system_prompt),
                voice_id = COALESCE(?, voice_id),
                first_message = COALESCE(?, first_message),
                react_flow_data = COALESCE(?, react_flow_data),
                updated_at = ?
             WHERE id = ? AND project_id = ?
             RETURNING {AGENT_COLUMNS}"
        ))
        .bind(patch.agent_name.as_deref())
        .bind(patch.system_prompt.as_deref())
        .bind(patch.voice_id.as_deref())
        .bind(patch.first_message.as_deref())
        .bind(patch.react_flow_data.as_ref().map(|value| value.to_string()))
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .bind(&project_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }

    async fn apply_transition(
        &self,
        id: &AgentId,
        transition: &AgentTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let expected = transition.expected_statuses();
        let placeholders = vec!["?"; expected.len()].join(", ");
        let guard = match transition.guard() {
            IdentifierGuard::VoiceUnset => "AND elevenlabs_agent_id IS NULL",
            IdentifierGuard::VoiceSetBridgeUnset => {
                "AND elevenlabs_agent_id IS NOT NULL AND digitalocean_app_id IS NULL"
            }
            IdentifierGuard::Any => "",
        };

        let (voice_agent_id, app_id, deployment_url, deployed_at) = match transition {
            AgentTransition::CompleteVoiceDeploy { voice_agent_id } => {
                (Some(voice_agent_id.as_str()), None, None, Some(now.to_rfc3339()))
            }
            AgentTransition::CompleteBridgeDeploy { app_id, deployment_url } => (
                None,
                Some(app_id.as_str()),
                Some(deployment_url.as_str()),
                Some(now.to_rfc3339()),
            ),
            AgentTransition::BeginVoiceDeploy
            | AgentTransition::BeginBridgeDeploy
            | AgentTransition::Fail { .. } => (None, None, None, None),
        };

        let sql = format!(
            "UPDATE agent SET
                status = ?,
                updated_at = ?,
                elevenlabs_agent_id = COALESCE(?, elevenlabs_agent_id),
                digitalocean_app_id = COALESCE(?, digitalocean_app_id),
                deployment_url = COALESCE(?, deployment_url),
                deployed_at = COALESCE(?, deployed_at)
             WHERE id = ? AND status IN ({placeholders}) {guard}
             RETURNING {AGENT_COLUMNS}"
        );

        let mut query = sqlx::query(&sql)
            .bind(transition.target().as_str())
            .bind(now.to_rfc3339())
            .bind(voice_agent_id)
            .bind(app_id)
            .bind(deployment_url)
            .bind(deployed_at)
            .bind(&id.0);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.map(agent_from_row).transpose()
    }

    async fn touch_deployed_at(
        &self,
        id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE agent SET deployed_at = ?
             WHERE id = ? AND elevenlabs_agent_id IS NOT NULL
             RETURNING {AGENT_COLUMNS}"
        ))
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = AgentStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown agent status `{status_raw}`")))?;

    let canvas_raw = row.try_get::<String, _>("react_flow_data")?;
    let react_flow_data = serde_json::from_str(&canvas_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid react_flow_data json: {error}"))
    })?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        agent_name: row.try_get("agent_name")?,
        system_prompt: row.try_get("system_prompt")?,
        voice_id: row.try_get("voice_id")?,
        first_message: row.try_get("first_message")?,
        react_flow_data,
        status,
        elevenlabs_agent_id: row.try_get("elevenlabs_agent_id")?,
        digitalocean_app_id: row.try_get("digitalocean_app_id")?,
        deployment_url: row.try_get("deployment_url")?,
        deployed_at: parse_optional_timestamp("deployed_at", row.try_get("deployed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use factory_core::domain::agent::{
        Agent, AgentConfigPatch, AgentId, AgentStatus, AgentTransition,
    };
    use factory_core::domain::project::{Project, ProjectId, UserId};

    use super::SqlAgentRepository;
    use crate::migrations;
    use crate::repositories::{
        AgentRepository, ProjectRepository, RepositoryError, SqlProjectRepository,
    };
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());
        let agent = sample_agent(&pool, "proj-rt").await;

        repo.insert(agent.clone()).await.expect("insert");

        assert_eq!(repo.find_by_id(&agent.id).await.expect("find"), Some(agent.clone()));
        assert_eq!(
            repo.find_in_project(&agent.id, &agent.project_id).await.expect("find in project"),
            Some(agent.clone())
        );
        assert_eq!(
            repo.find_in_project(&agent.id, &ProjectId("other".to_string()))
                .await
                .expect("find in other project"),
            None
        );
        assert_eq!(repo.find_by_project(&agent.project_id).await.expect("by project"), Some(agent));
    }

    #[tokio::test]
    async fn second_agent_for_project_is_a_conflict() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());
        let agent = sample_agent(&pool, "proj-dup").await;
        repo.insert(agent.clone()).await.expect("first insert");

        let mut second = agent.clone();
        second.id = AgentId("agent-dup-2".to_string());
        let error = repo.insert(second).await.expect_err("duplicate project agent");

        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn transitions_compare_and_set_on_status_and_identifiers() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());
        let agent = sample_agent(&pool, "proj-cas").await;
        repo.insert(agent.clone()).await.expect("insert");
        let now = fixed_time() + Duration::minutes(5);

        let deploying = repo
            .apply_transition(&agent.id, &AgentTransition::BeginVoiceDeploy, now)
            .await
            .expect("begin")
            .expect("row matched");
        assert_eq!(deploying.status, AgentStatus::Deploying);

        let lost = repo
            .apply_transition(&agent.id, &AgentTransition::BeginVoiceDeploy, now)
            .await
            .expect("second begin");
        assert_eq!(lost, None, "a second begin must lose the race");

        let active = repo
            .apply_transition(
                &agent.id,
                &AgentTransition::CompleteVoiceDeploy { voice_agent_id: "eid-1".to_string() },
                now,
            )
            .await
            .expect("complete")
            .expect("row matched");
        assert_eq!(active.status, AgentStatus::Active);
        assert_eq!(active.elevenlabs_agent_id.as_deref(), Some("eid-1"));
        assert_eq!(active.deployed_at, Some(now));

        let bridging = repo
            .apply_transition(&agent.id, &AgentTransition::BeginBridgeDeploy, now)
            .await
            .expect("begin bridge")
            .expect("row matched");
        assert_eq!(bridging.status, AgentStatus::DeployingBridge);

        let failed = repo
            .apply_transition(
                &agent.id,
                &AgentTransition::Fail { from: AgentStatus::DeployingBridge },
                now,
            )
            .await
            .expect("fail")
            .expect("row matched");
        assert_eq!(failed.status, AgentStatus::Error);
        assert_eq!(failed.elevenlabs_agent_id.as_deref(), Some("eid-1"));
        assert_eq!(failed.digitalocean_app_id, None);

        let voice_again = repo
            .apply_transition(&agent.id, &AgentTransition::BeginVoiceDeploy, now)
            .await
            .expect("voice retry");
        assert_eq!(voice_again, None, "phase one cannot re-run once its id is set");
    }

    #[tokio::test]
    async fn bridge_completion_persists_identifiers() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());
        let mut agent = sample_agent(&pool, "proj-bridge").await;
        agent.status = AgentStatus::DeployingBridge;
        agent.elevenlabs_agent_id = Some("eid-7".to_string());
        repo.insert(agent.clone()).await.expect("insert");
        let now = fixed_time() + Duration::minutes(9);

        let published = repo
            .apply_transition(
                &agent.id,
                &AgentTransition::CompleteBridgeDeploy {
                    app_id: "app-7".to_string(),
                    deployment_url: "https://bridge-7.ondigitalocean.app".to_string(),
                },
                now,
            )
            .await
            .expect("complete bridge")
            .expect("row matched");

        assert_eq!(published.status, AgentStatus::Published);
        assert_eq!(published.digitalocean_app_id.as_deref(), Some("app-7"));
        assert_eq!(published.deployment_url.as_deref(), Some("https://bridge-7.ondigitalocean.app"));
        assert_eq!(published.deployed_at, Some(now));
    }

    #[tokio::test]
    async fn config_update_and_touch_leave_deployment_state_alone() {
        let pool = setup_pool().await;
        let repo = SqlAgentRepository::new(pool.clone());
        let mut agent = sample_agent(&pool, "proj-cfg").await;
        agent.status = AgentStatus::Active;
        agent.elevenlabs_agent_id = Some("eid-3".to_string());
        repo.insert(agent.clone()).await.expect("insert");

        let patch = AgentConfigPatch {
            system_prompt: Some("Keep answers short.".to_string()),
            react_flow_data: Some(json!({ "position": { "x": 1, "y": 2 } })),
            ..AgentConfigPatch::default()
        };
        let later = fixed_time() + Duration::hours(1);
        let updated = repo
            .update_config(&agent.id, &agent.project_id, &patch, later)
            .await
            .expect("update")
            .expect("row matched");
        assert_eq!(updated.system_prompt, "Keep answers short.");
        assert_eq!(updated.agent_name, agent.agent_name);
        assert_eq!(updated.react_flow_data["position"]["x"], 1);
        assert_eq!(updated.updated_at, later);

        let touched_at = later + Duration::minutes(1);
        let touched =
            repo.touch_deployed_at(&agent.id, touched_at).await.expect("touch").expect("matched");
        assert_eq!(touched.deployed_at, Some(touched_at));
        assert_eq!(touched.status, AgentStatus::Active);
        assert_eq!(touched.updated_at, updated.updated_at);
        assert_eq!(touched.elevenlabs_agent_id.as_deref(), Some("eid-3"));
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").expect("timestamp").with_timezone(&Utc)
    }

    async fn sample_agent(pool: &DbPool, project_id: &str) -> Agent {
        let project = Project {
            id: ProjectId(project_id.to_string()),
            user_id: UserId("user-1".to_string()),
            name: "Demo".to_string(),
            created_at: fixed_time(),
        };
        SqlProjectRepository::new(pool.clone()).save(project.clone()).await.expect("save project");

        let mut agent = Agent::new_draft(
            AgentId(format!("agent-{project_id}")),
            project.id,
            "Front Desk",
            fixed_time(),
        );
        agent.system_prompt = "Greet callers.".to_string();
        agent.voice_id = "voice-1".to_string();
        agent
    }
}

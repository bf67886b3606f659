use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use factory_core::auth::TokenVerifier;
use factory_core::domain::agent::{Agent, AgentConfigPatch, AgentId};
use factory_core::domain::project::ProjectId;
use factory_core::errors::ApplicationError;
use factory_deploy::DeploymentOrchestrator;

use crate::auth::Caller;
use crate::error::{reject, ApiRejection};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: DeploymentOrchestrator,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/projects/{project_id}/agents", post(create_agent))
        .route("/api/projects/{project_id}/agent", get(project_agent))
        .route(
            "/api/projects/{project_id}/agents/{agent_id}",
            put(update_agent).patch(sync_deployed_agent),
        )
        .route("/api/projects/{project_id}/agents/{agent_id}/deploy", post(deploy_agent))
        .route("/api/agents/{agent_id}", get(get_agent))
        .route("/api/agents/{agent_id}/deploy-bridge", post(deploy_bridge))
        .route("/api/agents/{agent_id}/deploy-bridge/cancel", post(cancel_bridge))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct BridgeQuery {
    pub mode: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BridgeMode {
    Blocking,
    Background,
}

impl BridgeMode {
    fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("blocking") => Some(Self::Blocking),
            Some("background") => Some(Self::Background),
            Some(_) => None,
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct CancelResponse {
    pub agent_id: String,
    pub cancelled: bool,
}

async fn create_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(project_id): Path<String>,
    Json(fields): Json<AgentConfigPatch>,
) -> Result<(StatusCode, Json<Agent>), ApiRejection> {
    state
        .orchestrator
        .create_agent(&ctx, &ProjectId(project_id), fields)
        .await
        .map(|agent| (StatusCode::CREATED, Json(agent)))
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn project_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(project_id): Path<String>,
) -> Result<Json<Agent>, ApiRejection> {
    state
        .orchestrator
        .project_agent(&ctx, &ProjectId(project_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn update_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path((project_id, agent_id)): Path<(String, String)>,
    Json(patch): Json<AgentConfigPatch>,
) -> Result<Json<Agent>, ApiRejection> {
    state
        .orchestrator
        .update_config(&ctx, &ProjectId(project_id), &AgentId(agent_id), patch)
        .await
        .map(Json)
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn sync_deployed_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path((project_id, agent_id)): Path<(String, String)>,
) -> Result<Json<Agent>, ApiRejection> {
    state
        .orchestrator
        .update_deployed_agent(&ctx, &ProjectId(project_id), &AgentId(agent_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn deploy_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path((project_id, agent_id)): Path<(String, String)>,
) -> Result<Json<Agent>, ApiRejection> {
    state
        .orchestrator
        .deploy_agent(&ctx, &ProjectId(project_id), &AgentId(agent_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn get_agent(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>, ApiRejection> {
    state
        .orchestrator
        .agent(&ctx, &AgentId(agent_id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &ctx.correlation_id))
}

async fn deploy_bridge(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(agent_id): Path<String>,
    Query(query): Query<BridgeQuery>,
) -> Result<(StatusCode, Json<Agent>), ApiRejection> {
    let Some(mode) = BridgeMode::parse(query.mode.as_deref()) else {
        return Err(reject(
            ApplicationError::InvalidInput("mode must be `blocking` or `background`".to_string()),
            &ctx.correlation_id,
        ));
    };
    let agent_id = AgentId(agent_id);

    let result = match mode {
        BridgeMode::Blocking => state
            .orchestrator
            .deploy_bridge(&ctx, &agent_id)
            .await
            .map(|agent| (StatusCode::OK, Json(agent))),
        BridgeMode::Background => state
            .orchestrator
            .start_bridge_deploy(&ctx, &agent_id)
            .await
            .map(|agent| (StatusCode::ACCEPTED, Json(agent))),
    };
    result.map_err(|error| reject(error, &ctx.correlation_id))
}

async fn cancel_bridge(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(agent_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiRejection> {
    let agent_id = AgentId(agent_id);
    match state.orchestrator.cancel_bridge_deploy(&ctx, &agent_id).await {
        Ok(true) => Ok((
            StatusCode::ACCEPTED,
            Json(CancelResponse { agent_id: agent_id.0, cancelled: true }),
        )),
        Ok(false) => Err(reject(
            ApplicationError::NotFound(format!("running bridge deploy for agent `{agent_id}`")),
            &ctx.correlation_id,
        )),
        Err(error) => Err(reject(error, &ctx.correlation_id)),
    }
}

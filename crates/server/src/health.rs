use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use factory_db::DbPool;
use factory_deploy::BridgeTasks;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    bridge_tasks: BridgeTasks,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub bridge_deploys_running: usize,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, bridge_tasks: BridgeTasks) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, bridge_tasks })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "factory-server runtime initialized".to_string(),
        },
        database,
        bridge_deploys_running: state.bridge_tasks.running_count(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM agent").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "agent table reachable".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

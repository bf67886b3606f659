use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use factory_core::errors::{ApplicationError, InterfaceError};

#[derive(Debug, PartialEq, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub correlation_id: String,
}

pub type ApiRejection = (StatusCode, Json<ApiError>);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self {
            error: value.message().to_string(),
            details: value.details().cloned(),
            correlation_id: value.correlation_id().to_string(),
        }
    }
}

pub fn reject(error: ApplicationError, correlation_id: &str) -> ApiRejection {
    let interface = error.into_interface(correlation_id);
    let status =
        StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id,
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.rejected",
            correlation_id,
            status = status.as_u16(),
            error = %interface,
            "request rejected"
        );
    }

    (status, Json(ApiError::from(interface)))
}

pub fn unauthenticated(message: impl Into<String>, correlation_id: &str) -> ApiRejection {
    reject(ApplicationError::Unauthenticated(message.into()), correlation_id)
}

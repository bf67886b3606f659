use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use factory_core::auth::AuthError;
use factory_deploy::RequestContext;

use crate::api::ApiState;
use crate::error::{unauthenticated, ApiRejection};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The verified caller of an API request.
#[derive(Clone, Debug)]
pub struct Caller(pub RequestContext);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| format!("req-{}", uuid::Uuid::new_v4()));

        let token = bearer_token(parts)
            .ok_or_else(|| unauthenticated(AuthError::MissingToken.to_string(), &correlation_id))?;
        let user_id = state
            .verifier
            .verify(token)
            .await
            .map_err(|error| unauthenticated(error.to_string(), &correlation_id))?;

        Ok(Self(RequestContext::with_correlation_id(user_id, correlation_id)))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

use std::time::Duration;

use factory_core::errors::{Provider, ProviderError};
use serde_json::Value;

/// Builds the shared client used by both platform adapters.
pub(crate) fn build_client(
    provider: Provider,
    timeout_secs: u64,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("agent-factory/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| ProviderError::Transport {
            provider,
            operation: "client setup",
            message: error.to_string(),
        })
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Names one outbound call so failures can say where they came from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Call {
    pub provider: Provider,
    pub operation: &'static str,
}

impl Call {
    pub(crate) fn transport(self, error: reqwest::Error) -> ProviderError {
        ProviderError::Transport {
            provider: self.provider,
            operation: self.operation,
            message: error.to_string(),
        }
    }

    pub(crate) fn malformed(self, message: impl Into<String>, body: Option<Value>) -> ProviderError {
        ProviderError::Malformed {
            provider: self.provider,
            operation: self.operation,
            message: message.into(),
            body,
        }
    }

    /// Reads the response body and turns non-2xx statuses into
    /// [`ProviderError::Status`] carrying whatever the platform sent back.
    pub(crate) async fn read_json(
        self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, ProviderError> {
        let response = response.map_err(|error| self.transport(error))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| self.transport(error))?;
        let body = parse_body(&text);

        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.provider,
                operation: self.operation,
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

/// Error bodies are not always JSON; keep the raw text when parsing fails.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub(crate) fn string_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

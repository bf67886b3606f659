use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use factory_core::config::CloudConfig;
use factory_core::deploy::{AppSpec, AppStatus, CloudPlatform};
use factory_core::errors::{Provider, ProviderError};

use crate::http::{build_client, endpoint, string_at, Call};

const CREATE_APP: Call = Call { provider: Provider::CloudPlatform, operation: "app create" };
const APP_STATUS: Call = Call { provider: Provider::CloudPlatform, operation: "app status" };

/// DigitalOcean App Platform API.
#[derive(Clone)]
pub struct DigitalOceanClient {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl DigitalOceanClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: SecretString,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Provider::CloudPlatform, timeout_secs)?,
            base_url: base_url.into(),
            api_token,
        })
    }

    pub fn from_config(config: &CloudConfig) -> Result<Self, ProviderError> {
        Self::new(config.base_url.clone(), config.api_token.clone(), config.timeout_secs)
    }
}

#[async_trait]
impl CloudPlatform for DigitalOceanClient {
    async fn create_app(&self, spec: &AppSpec) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, "apps"))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "spec": spec }))
            .send()
            .await;
        let body = CREATE_APP.read_json(response).await?;

        match string_at(&body, "/app/id") {
            Some(app_id) => Ok(app_id.to_string()),
            None => Err(CREATE_APP.malformed("response did not include app.id", Some(body))),
        }
    }

    async fn app_status(&self, app_id: &str) -> Result<AppStatus, ProviderError> {
        let response = self
            .client
            .get(endpoint(&self.base_url, &format!("apps/{app_id}")))
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await;
        let body = APP_STATUS.read_json(response).await?;

        if body.pointer("/app").is_none() {
            return Err(APP_STATUS.malformed("response did not include an app", Some(body)));
        }

        Ok(AppStatus {
            phase: string_at(&body, "/app/active_deployment/phase").map(str::to_string),
            live_url: string_at(&body, "/app/live_url").map(str::to_string),
        })
    }
}

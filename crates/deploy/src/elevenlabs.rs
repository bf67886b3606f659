use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use factory_core::config::VoiceConfig;
use factory_core::deploy::{VoiceAgentDefinition, VoicePlatform};
use factory_core::errors::{Provider, ProviderError};

use crate::http::{build_client, endpoint, string_at, Call};

const CREATE_AGENT: Call = Call { provider: Provider::VoicePlatform, operation: "agent create" };
const UPDATE_AGENT: Call = Call { provider: Provider::VoicePlatform, operation: "agent update" };

/// ElevenLabs Conversational AI agents API.
#[derive(Clone)]
pub struct ElevenLabsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl ElevenLabsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Provider::VoicePlatform, timeout_secs)?,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn from_config(config: &VoiceConfig) -> Result<Self, ProviderError> {
        Self::new(config.base_url.clone(), config.api_key.clone(), config.timeout_secs)
    }
}

#[async_trait]
impl VoicePlatform for ElevenLabsClient {
    async fn create_agent(&self, definition: &VoiceAgentDefinition) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, "agents/create"))
            .header("xi-api-key", self.api_key.expose_secret())
            .json(definition)
            .send()
            .await;
        let body = CREATE_AGENT.read_json(response).await?;

        match string_at(&body, "/agent_id") {
            Some(agent_id) => Ok(agent_id.to_string()),
            None => Err(CREATE_AGENT.malformed("response did not include an agent_id", Some(body))),
        }
    }

    async fn update_agent(
        &self,
        voice_agent_id: &str,
        definition: &VoiceAgentDefinition,
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .patch(endpoint(&self.base_url, &format!("agents/{voice_agent_id}")))
            .header("xi-api-key", self.api_key.expose_secret())
            .json(definition)
            .send()
            .await;
        UPDATE_AGENT.read_json(response).await?;
        Ok(())
    }
}

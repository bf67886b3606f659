use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{CloudConfig, VoiceConfig};
use crate::deploy::app_name::ApplicationName;
use crate::domain::agent::Agent;

/// Agent definition accepted by the voice platform for both create and update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAgentDefinition {
    pub name: String,
    pub conversation_config: ConversationConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub agent: AgentBehaviour,
    pub tts: TtsConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBehaviour {
    pub prompt: PromptConfig,
    pub first_message: String,
    pub language: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsConfig {
    pub voice_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceDefaults {
    pub language: String,
    pub first_message: String,
}

impl VoiceDefaults {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            language: config.language.clone(),
            first_message: config.default_first_message.clone(),
        }
    }
}

impl VoiceAgentDefinition {
    pub fn from_agent(agent: &Agent, defaults: &VoiceDefaults) -> Self {
        let first_message = if agent.first_message.trim().is_empty() {
            defaults.first_message.clone()
        } else {
            agent.first_message.clone()
        };

        Self {
            name: agent.agent_name.clone(),
            conversation_config: ConversationConfig {
                agent: AgentBehaviour {
                    prompt: PromptConfig { prompt: agent.system_prompt.clone() },
                    first_message,
                    language: defaults.language.clone(),
                },
                tts: TtsConfig { voice_id: agent.voice_id.clone() },
            },
        }
    }
}

/// Fixed parts of the bridge service spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeTemplate {
    pub region: String,
    pub service_name: String,
    pub repo: String,
    pub branch: String,
    pub run_command: String,
    pub environment_slug: String,
    pub instance_size: String,
    pub instance_count: u32,
    pub http_port: u16,
}

impl BridgeTemplate {
    pub fn from_config(config: &CloudConfig) -> Self {
        Self {
            region: config.region.clone(),
            service_name: "bridge-service".to_string(),
            repo: config.bridge_repo.clone(),
            branch: config.bridge_branch.clone(),
            run_command: config.run_command.clone(),
            environment_slug: config.environment_slug.clone(),
            instance_size: config.instance_size.clone(),
            instance_count: 1,
            http_port: config.http_port,
        }
    }

    /// One service bound to the template repo with exactly the two runtime env entries
    /// the bridge reads on boot.
    pub fn app_spec(
        &self,
        name: &ApplicationName,
        voice_api_key: &SecretString,
        voice_agent_id: &str,
    ) -> AppSpec {
        AppSpec {
            name: name.as_str().to_string(),
            region: self.region.clone(),
            services: vec![ServiceSpec {
                name: self.service_name.clone(),
                github: GithubSource {
                    repo: self.repo.clone(),
                    branch: self.branch.clone(),
                    deploy_on_push: true,
                },
                run_command: self.run_command.clone(),
                environment_slug: self.environment_slug.clone(),
                instance_size_slug: self.instance_size.clone(),
                instance_count: self.instance_count,
                http_port: self.http_port,
                envs: vec![
                    EnvVar {
                        key: "ELEVENLABS_API_KEY".to_string(),
                        value: voice_api_key.expose_secret().to_string(),
                        kind: EnvVarKind::Secret,
                        scope: EnvVarScope::RunTime,
                    },
                    EnvVar {
                        key: "ELEVENLABS_AGENT_ID".to_string(),
                        value: voice_agent_id.to_string(),
                        kind: EnvVarKind::General,
                        scope: EnvVarScope::RunTime,
                    },
                ],
            }],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    pub region: String,
    pub services: Vec<ServiceSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub github: GithubSource,
    pub run_command: String,
    pub environment_slug: String,
    pub instance_size_slug: String,
    pub instance_count: u32,
    pub http_port: u16,
    pub envs: Vec<EnvVar>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubSource {
    pub repo: String,
    pub branch: String,
    pub deploy_on_push: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: EnvVarKind,
    pub scope: EnvVarScope,
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.kind {
            EnvVarKind::Secret => "[REDACTED]",
            EnvVarKind::General => self.value.as_str(),
        };
        f.debug_struct("EnvVar")
            .field("key", &self.key)
            .field("value", &value)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvVarKind {
    General,
    Secret,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvVarScope {
    RunTime,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::deploy::app_name::derive_application_name;
    use crate::domain::agent::{Agent, AgentId};
    use crate::domain::project::ProjectId;

    use super::{BridgeTemplate, VoiceAgentDefinition, VoiceDefaults};

    fn agent(first_message: &str) -> Agent {
        let mut agent = Agent::new_draft(
            AgentId("agent-1".to_string()),
            ProjectId("proj-1".to_string()),
            "Front Desk",
            Utc::now(),
        );
        agent.system_prompt = "Answer politely.".to_string();
        agent.voice_id = "voice-9".to_string();
        agent.first_message = first_message.to_string();
        agent
    }

    #[test]
    fn voice_definition_matches_platform_shape() {
        let defaults = VoiceDefaults::from_config(&AppConfig::default().voice);
        let definition = VoiceAgentDefinition::from_agent(&agent("Hi there"), &defaults);

        assert_eq!(
            serde_json::to_value(&definition).expect("serialize"),
            json!({
                "name": "Front Desk",
                "conversation_config": {
                    "agent": {
                        "prompt": { "prompt": "Answer politely." },
                        "first_message": "Hi there",
                        "language": "en"
                    },
                    "tts": { "voice_id": "voice-9" }
                }
            })
        );
    }

    #[test]
    fn blank_first_message_uses_default_greeting() {
        let defaults = VoiceDefaults::from_config(&AppConfig::default().voice);
        let definition = VoiceAgentDefinition::from_agent(&agent("  "), &defaults);

        assert_eq!(definition.conversation_config.agent.first_message, "Hello! How can I help you?");
    }

    #[test]
    fn bridge_spec_has_template_source_and_two_runtime_envs() {
        let template = BridgeTemplate::from_config(&AppConfig::default().cloud);
        let name = derive_application_name("Front Desk", "agent-1");
        let key = SecretString::from("xi-secret".to_string());
        let spec = template.app_spec(&name, &key, "eid-1");

        let value = serde_json::to_value(&spec).expect("serialize");
        let service = &value["services"][0];
        assert_eq!(value["name"], "front-desk");
        assert_eq!(value["region"], "nyc");
        assert_eq!(service["github"]["repo"], "abetancurultim/agent-bridge-template");
        assert_eq!(service["github"]["deploy_on_push"], true);
        assert_eq!(service["http_port"], 8080);
        assert_eq!(service["instance_size_slug"], "basic-xxs");
        assert_eq!(
            service["envs"],
            json!([
                { "key": "ELEVENLABS_API_KEY", "value": "xi-secret", "type": "SECRET", "scope": "RUN_TIME" },
                { "key": "ELEVENLABS_AGENT_ID", "value": "eid-1", "type": "GENERAL", "scope": "RUN_TIME" }
            ])
        );
    }

    #[test]
    fn debug_output_redacts_secret_env_values() {
        let template = BridgeTemplate::from_config(&AppConfig::default().cloud);
        let name = derive_application_name("Front Desk", "agent-1");
        let key = SecretString::from("xi-secret".to_string());
        let debug = format!("{:?}", template.app_spec(&name, &key, "eid-1"));

        assert!(!debug.contains("xi-secret"));
        assert!(debug.contains("eid-1"));
    }
}

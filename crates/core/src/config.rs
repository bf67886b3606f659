use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::DEFAULT_FIRST_MESSAGE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub voice: VoiceConfig,
    pub cloud: CloudConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Voice-agent hosting platform (ElevenLabs Conversational AI).
#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub language: String,
    pub default_first_message: String,
    pub timeout_secs: u64,
}

/// Cloud application platform hosting the bridge (DigitalOcean App Platform).
#[derive(Clone, Debug)]
pub struct CloudConfig {
    pub api_token: SecretString,
    pub base_url: String,
    pub region: String,
    pub bridge_repo: String,
    pub bridge_branch: String,
    pub instance_size: String,
    pub run_command: String,
    pub environment_slug: String,
    pub http_port: u16,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub token_secret: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub voice_api_key: Option<String>,
    pub cloud_api_token: Option<String>,
    pub auth_token_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://factory.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8091,
                graceful_shutdown_secs: 15,
            },
            voice: VoiceConfig {
                api_key: String::new().into(),
                base_url: "https://api.elevenlabs.io/v1/convai".to_string(),
                language: "en".to_string(),
                default_first_message: DEFAULT_FIRST_MESSAGE.to_string(),
                timeout_secs: 30,
            },
            cloud: CloudConfig {
                api_token: String::new().into(),
                base_url: "https://api.digitalocean.com/v2".to_string(),
                region: "nyc".to_string(),
                bridge_repo: "abetancurultim/agent-bridge-template".to_string(),
                bridge_branch: "main".to_string(),
                instance_size: "basic-xxs".to_string(),
                run_command: "npm start".to_string(),
                environment_slug: "node-js".to_string(),
                http_port: 8080,
                poll_interval_secs: 5,
                max_poll_attempts: 60,
                timeout_secs: 30,
            },
            auth: AuthConfig { token_secret: String::new().into() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("factory.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(voice) = patch.voice {
            if let Some(voice_api_key_value) = voice.api_key {
                self.voice.api_key = secret_value(voice_api_key_value);
            }
            if let Some(base_url) = voice.base_url {
                self.voice.base_url = base_url;
            }
            if let Some(language) = voice.language {
                self.voice.language = language;
            }
            if let Some(default_first_message) = voice.default_first_message {
                self.voice.default_first_message = default_first_message;
            }
            if let Some(timeout_secs) = voice.timeout_secs {
                self.voice.timeout_secs = timeout_secs;
            }
        }

        if let Some(cloud) = patch.cloud {
            if let Some(cloud_api_token_value) = cloud.api_token {
                self.cloud.api_token = secret_value(cloud_api_token_value);
            }
            if let Some(base_url) = cloud.base_url {
                self.cloud.base_url = base_url;
            }
            if let Some(region) = cloud.region {
                self.cloud.region = region;
            }
            if let Some(bridge_repo) = cloud.bridge_repo {
                self.cloud.bridge_repo = bridge_repo;
            }
            if let Some(bridge_branch) = cloud.bridge_branch {
                self.cloud.bridge_branch = bridge_branch;
            }
            if let Some(instance_size) = cloud.instance_size {
                self.cloud.instance_size = instance_size;
            }
            if let Some(run_command) = cloud.run_command {
                self.cloud.run_command = run_command;
            }
            if let Some(environment_slug) = cloud.environment_slug {
                self.cloud.environment_slug = environment_slug;
            }
            if let Some(http_port) = cloud.http_port {
                self.cloud.http_port = http_port;
            }
            if let Some(poll_interval_secs) = cloud.poll_interval_secs {
                self.cloud.poll_interval_secs = poll_interval_secs;
            }
            if let Some(max_poll_attempts) = cloud.max_poll_attempts {
                self.cloud.max_poll_attempts = max_poll_attempts;
            }
            if let Some(timeout_secs) = cloud.timeout_secs {
                self.cloud.timeout_secs = timeout_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(auth_token_secret_value) = auth.token_secret {
                self.auth.token_secret = secret_value(auth_token_secret_value);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FACTORY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FACTORY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FACTORY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FACTORY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FACTORY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FACTORY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("FACTORY_SERVER_PORT")
            .map(|value| ("FACTORY_SERVER_PORT", value))
            .or_else(|| read_env("PORT").map(|value| ("PORT", value)));
        if let Some((key, value)) = port {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("FACTORY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FACTORY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let voice_api_key =
            read_env("FACTORY_VOICE_API_KEY").or_else(|| read_env("ELEVENLABS_API_KEY"));
        if let Some(value) = voice_api_key {
            self.voice.api_key = secret_value(value);
        }
        if let Some(value) = read_env("FACTORY_VOICE_BASE_URL") {
            self.voice.base_url = value;
        }
        if let Some(value) = read_env("FACTORY_VOICE_LANGUAGE") {
            self.voice.language = value;
        }
        if let Some(value) = read_env("FACTORY_VOICE_TIMEOUT_SECS") {
            self.voice.timeout_secs = parse_u64("FACTORY_VOICE_TIMEOUT_SECS", &value)?;
        }

        let cloud_api_token =
            read_env("FACTORY_CLOUD_API_TOKEN").or_else(|| read_env("DIGITALOCEAN_API_TOKEN"));
        if let Some(value) = cloud_api_token {
            self.cloud.api_token = secret_value(value);
        }
        if let Some(value) = read_env("FACTORY_CLOUD_BASE_URL") {
            self.cloud.base_url = value;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_REGION") {
            self.cloud.region = value;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_BRIDGE_REPO") {
            self.cloud.bridge_repo = value;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_BRIDGE_BRANCH") {
            self.cloud.bridge_branch = value;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_POLL_INTERVAL_SECS") {
            self.cloud.poll_interval_secs = parse_u64("FACTORY_CLOUD_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_MAX_POLL_ATTEMPTS") {
            self.cloud.max_poll_attempts = parse_u32("FACTORY_CLOUD_MAX_POLL_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("FACTORY_CLOUD_TIMEOUT_SECS") {
            self.cloud.timeout_secs = parse_u64("FACTORY_CLOUD_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FACTORY_AUTH_TOKEN_SECRET") {
            self.auth.token_secret = secret_value(value);
        }

        let log_level =
            read_env("FACTORY_LOGGING_LEVEL").or_else(|| read_env("FACTORY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FACTORY_LOGGING_FORMAT").or_else(|| read_env("FACTORY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(voice_api_key) = overrides.voice_api_key {
            self.voice.api_key = secret_value(voice_api_key);
        }
        if let Some(cloud_api_token) = overrides.cloud_api_token {
            self.cloud.api_token = secret_value(cloud_api_token);
        }
        if let Some(auth_token_secret) = overrides.auth_token_secret {
            self.auth.token_secret = secret_value(auth_token_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_voice(&self.voice)?;
        validate_cloud(&self.cloud)?;
        validate_auth(&self.auth)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("factory.toml"), PathBuf::from("config/factory.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_voice(voice: &VoiceConfig) -> Result<(), ConfigError> {
    if voice.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "voice.api_key is required. Set FACTORY_VOICE_API_KEY or ELEVENLABS_API_KEY with a key from https://elevenlabs.io/app/settings/api-keys".to_string(),
        ));
    }
    validate_http_url("voice.base_url", &voice.base_url)?;

    if voice.language.trim().is_empty() {
        return Err(ConfigError::Validation("voice.language must not be empty".to_string()));
    }

    if voice.timeout_secs == 0 || voice.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "voice.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_cloud(cloud: &CloudConfig) -> Result<(), ConfigError> {
    if cloud.api_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "cloud.api_token is required. Set FACTORY_CLOUD_API_TOKEN or DIGITALOCEAN_API_TOKEN with a token from https://cloud.digitalocean.com/account/api/tokens".to_string(),
        ));
    }
    validate_http_url("cloud.base_url", &cloud.base_url)?;

    if cloud.bridge_repo.split('/').filter(|part| !part.trim().is_empty()).count() != 2 {
        return Err(ConfigError::Validation(
            "cloud.bridge_repo must be in `owner/repo` form".to_string(),
        ));
    }

    if cloud.http_port == 0 {
        return Err(ConfigError::Validation(
            "cloud.http_port must be greater than zero".to_string(),
        ));
    }

    if cloud.poll_interval_secs == 0 || cloud.poll_interval_secs > 60 {
        return Err(ConfigError::Validation(
            "cloud.poll_interval_secs must be in range 1..=60".to_string(),
        ));
    }

    if cloud.max_poll_attempts == 0 {
        return Err(ConfigError::Validation(
            "cloud.max_poll_attempts must be greater than zero".to_string(),
        ));
    }

    if cloud.timeout_secs == 0 || cloud.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "cloud.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    if auth.token_secret.expose_secret().len() < 16 {
        return Err(ConfigError::Validation(
            "auth.token_secret is required and must be at least 16 characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }

    Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    voice: Option<VoicePatch>,
    cloud: Option<CloudPatch>,
    auth: Option<AuthPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VoicePatch {
    api_key: Option<String>,
    base_url: Option<String>,
    language: Option<String>,
    default_first_message: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudPatch {
    api_token: Option<String>,
    base_url: Option<String>,
    region: Option<String>,
    bridge_repo: Option<String>,
    bridge_branch: Option<String>,
    instance_size: Option<String>,
    run_command: Option<String>,
    environment_slug: Option<String>,
    http_port: Option<u16>,
    poll_interval_secs: Option<u64>,
    max_poll_attempts: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    token_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use factory_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// One reported setting: dotted key, rendered value, and the env vars that can set it.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }

    fn secret(key: &'static str, secret: &SecretString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: redact_secret(secret.expose_secret()), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["FACTORY_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            &["FACTORY_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["FACTORY_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["FACTORY_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port, &["FACTORY_SERVER_PORT", "PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["FACTORY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::secret(
            "voice.api_key",
            &config.voice.api_key,
            &["FACTORY_VOICE_API_KEY", "ELEVENLABS_API_KEY"],
        ),
        Field::new("voice.base_url", &config.voice.base_url, &["FACTORY_VOICE_BASE_URL"]),
        Field::new("voice.language", &config.voice.language, &["FACTORY_VOICE_LANGUAGE"]),
        Field::new("voice.default_first_message", &config.voice.default_first_message, &[]),
        Field::new(
            "voice.timeout_secs",
            config.voice.timeout_secs,
            &["FACTORY_VOICE_TIMEOUT_SECS"],
        ),
        Field::secret(
            "cloud.api_token",
            &config.cloud.api_token,
            &["FACTORY_CLOUD_API_TOKEN", "DIGITALOCEAN_API_TOKEN"],
        ),
        Field::new("cloud.base_url", &config.cloud.base_url, &["FACTORY_CLOUD_BASE_URL"]),
        Field::new("cloud.region", &config.cloud.region, &["FACTORY_CLOUD_REGION"]),
        Field::new("cloud.bridge_repo", &config.cloud.bridge_repo, &["FACTORY_CLOUD_BRIDGE_REPO"]),
        Field::new(
            "cloud.bridge_branch",
            &config.cloud.bridge_branch,
            &["FACTORY_CLOUD_BRIDGE_BRANCH"],
        ),
        Field::new("cloud.instance_size", &config.cloud.instance_size, &[]),
        Field::new("cloud.run_command", &config.cloud.run_command, &[]),
        Field::new("cloud.environment_slug", &config.cloud.environment_slug, &[]),
        Field::new("cloud.http_port", config.cloud.http_port, &[]),
        Field::new(
            "cloud.poll_interval_secs",
            config.cloud.poll_interval_secs,
            &["FACTORY_CLOUD_POLL_INTERVAL_SECS"],
        ),
        Field::new(
            "cloud.max_poll_attempts",
            config.cloud.max_poll_attempts,
            &["FACTORY_CLOUD_MAX_POLL_ATTEMPTS"],
        ),
        Field::new(
            "cloud.timeout_secs",
            config.cloud.timeout_secs,
            &["FACTORY_CLOUD_TIMEOUT_SECS"],
        ),
        Field::secret("auth.token_secret", &config.auth.token_secret, &["FACTORY_AUTH_TOKEN_SECRET"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["FACTORY_LOGGING_LEVEL", "FACTORY_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["FACTORY_LOGGING_FORMAT", "FACTORY_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("factory.toml"), PathBuf::from("config/factory.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    let in_file = config_file_doc.is_some_and(|doc| contains_path(doc, key_path));
    if in_file {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

/// Keeps a short recognisable prefix (`dop_v1_`, `xi-`) and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix_len = trimmed
        .char_indices()
        .filter(|(_, ch)| *ch == '-' || *ch == '_')
        .map(|(index, _)| index + 1)
        .take_while(|end| *end <= 7)
        .last();

    match prefix_len {
        Some(end) => format!("{}***", &trimmed[..end]),
        None => "<redacted>".to_string(),
    }
}

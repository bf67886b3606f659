//! Tool connection contract: schema-driven config validation and enablement for agent
//! tool connections. Pure domain rules; nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::agent::AgentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolConnectionId(pub String);

/// Catalog entry for an external webhook integration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub deployment_url: String,
    pub schema_template: Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentToolConnection {
    pub id: ToolConnectionId,
    pub agent_id: AgentId,
    pub tool_id: ToolId,
    pub config: Map<String, Value>,
    pub position: CanvasPosition,
    pub is_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolConfigError {
    #[error("tool schema template is invalid: {0}")]
    InvalidSchema(String),
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),
    #[error("Invalid email format in field: {0}")]
    InvalidEmail(String),
}

impl AgentToolConnection {
    /// Connections start disabled with an empty config until the user fills it in.
    pub fn new(
        agent_id: AgentId,
        tool_id: ToolId,
        position: CanvasPosition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ToolConnectionId(uuid::Uuid::new_v4().to_string()),
            agent_id,
            tool_id,
            config: Map::new(),
            position,
            is_enabled: false,
            updated_at: now,
        }
    }

    /// Validates `config` against the tool schema and enables the connection.
    /// On error the connection is left unchanged.
    pub fn configure(
        &mut self,
        tool: &Tool,
        config: Map<String, Value>,
        position: Option<CanvasPosition>,
        now: DateTime<Utc>,
    ) -> Result<(), ToolConfigError> {
        validate_tool_config(&tool.schema_template, &config)?;
        validate_email_fields(&config)?;

        self.config = config;
        self.is_enabled = true;
        if let Some(position) = position {
            self.position = position;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Ids of the schema properties marked `required` with a `constant_value` type.
///
/// The template may be stored as a JSON string.
pub fn required_fields(schema_template: &Value) -> Result<Vec<String>, ToolConfigError> {
    let parsed;
    let schema = match schema_template {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw)
                .map_err(|error| ToolConfigError::InvalidSchema(error.to_string()))?;
            &parsed
        }
        other => other,
    };

    let properties = schema
        .pointer("/api_schema/request_body_schema/properties")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ToolConfigError::InvalidSchema(
                "api_schema.request_body_schema.properties must be an array".to_string(),
            )
        })?;

    Ok(properties
        .iter()
        .filter(|property| {
            property.get("required").and_then(Value::as_bool) == Some(true)
                && property.get("value_type").and_then(Value::as_str) == Some("constant_value")
        })
        .filter_map(|property| property.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

pub fn validate_tool_config(
    schema_template: &Value,
    config: &Map<String, Value>,
) -> Result<(), ToolConfigError> {
    let missing: Vec<String> = required_fields(schema_template)?
        .into_iter()
        .filter(|field| {
            !config
                .get(field)
                .and_then(Value::as_str)
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false)
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolConfigError::MissingRequiredFields(missing))
    }
}

/// Any populated key containing `email` must hold a plausible address.
pub fn validate_email_fields(config: &Map<String, Value>) -> Result<(), ToolConfigError> {
    for (key, value) in config.iter().filter(|(key, _)| key.contains("email")) {
        let Some(candidate) = value.as_str().filter(|candidate| !candidate.is_empty()) else {
            continue;
        };
        if !is_valid_email(candidate) {
            return Err(ToolConfigError::InvalidEmail(key.clone()));
        }
    }
    Ok(())
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn is_valid_email(candidate: &str) -> bool {
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = candidate.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }

    domain.char_indices().any(|(index, ch)| ch == '.' && index > 0 && index + 1 < domain.len())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map, Value};

    use crate::domain::agent::AgentId;

    use super::{
        is_valid_email, required_fields, AgentToolConnection, CanvasPosition, Tool, ToolConfigError,
        ToolId,
    };

    fn schema() -> Value {
        json!({
            "api_schema": {
                "request_body_schema": {
                    "properties": [
                        { "id": "api_key", "required": true, "value_type": "constant_value" },
                        { "id": "notify_email", "required": true, "value_type": "constant_value" },
                        { "id": "caller_name", "required": true, "value_type": "llm_prompt" },
                        { "id": "region", "required": false, "value_type": "constant_value" }
                    ]
                }
            }
        })
    }

    fn tool(schema_template: Value) -> Tool {
        Tool {
            id: ToolId("tool-crm".to_string()),
            name: "CRM webhook".to_string(),
            description: "Pushes leads".to_string(),
            deployment_url: "https://hooks.example/crm".to_string(),
            schema_template,
        }
    }

    fn config(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs.iter().map(|(key, value)| (key.to_string(), json!(value))).collect()
    }

    #[test]
    fn only_required_constant_values_are_required() {
        assert_eq!(
            required_fields(&schema()).expect("fields"),
            vec!["api_key".to_string(), "notify_email".to_string()]
        );
    }

    #[test]
    fn string_templates_are_parsed() {
        let raw = Value::String(schema().to_string());
        assert_eq!(required_fields(&raw).expect("fields").len(), 2);

        let broken = Value::String("{not json".to_string());
        assert!(matches!(required_fields(&broken), Err(ToolConfigError::InvalidSchema(_))));
    }

    #[test]
    fn new_connection_is_disabled_and_empty() {
        let connection = AgentToolConnection::new(
            AgentId("agent-1".to_string()),
            ToolId("tool-crm".to_string()),
            CanvasPosition { x: 10.0, y: 20.0 },
            Utc::now(),
        );

        assert!(!connection.is_enabled);
        assert!(connection.config.is_empty());
    }

    #[test]
    fn missing_or_blank_fields_are_listed_in_order() {
        let mut connection = AgentToolConnection::new(
            AgentId("agent-1".to_string()),
            ToolId("tool-crm".to_string()),
            CanvasPosition::default(),
            Utc::now(),
        );

        let error = connection
            .configure(&tool(schema()), config(&[("notify_email", "  ")]), None, Utc::now())
            .expect_err("missing fields");

        assert_eq!(error.to_string(), "Missing required fields: api_key, notify_email");
        assert!(!connection.is_enabled);
        assert!(connection.config.is_empty());
    }

    #[test]
    fn invalid_email_blocks_enablement() {
        let mut connection = AgentToolConnection::new(
            AgentId("agent-1".to_string()),
            ToolId("tool-crm".to_string()),
            CanvasPosition::default(),
            Utc::now(),
        );

        let error = connection
            .configure(
                &tool(schema()),
                config(&[("api_key", "k-1"), ("notify_email", "ops@localhost")]),
                None,
                Utc::now(),
            )
            .expect_err("bad email");

        assert_eq!(error, ToolConfigError::InvalidEmail("notify_email".to_string()));
        assert!(!connection.is_enabled);
    }

    #[test]
    fn valid_config_enables_connection() {
        let mut connection = AgentToolConnection::new(
            AgentId("agent-1".to_string()),
            ToolId("tool-crm".to_string()),
            CanvasPosition::default(),
            Utc::now(),
        );

        connection
            .configure(
                &tool(schema()),
                config(&[("api_key", "k-1"), ("notify_email", "ops@example.com")]),
                Some(CanvasPosition { x: 300.0, y: 120.0 }),
                Utc::now(),
            )
            .expect("configure");

        assert!(connection.is_enabled);
        assert_eq!(connection.config["api_key"], "k-1");
        assert_eq!(connection.position, CanvasPosition { x: 300.0, y: 120.0 });
    }

    #[test]
    fn email_shape_checks() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a b@c.io"));
        assert!(!is_valid_email("@c.io"));
        assert!(!is_valid_email("a@b@c.io"));
        assert!(!is_valid_email("a@.io"));
        assert!(!is_valid_email("a@io."));
        assert!(is_valid_email("a@b.c."));
    }
}

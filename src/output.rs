use crate::config::{AgentConfig, ConnectionConfig};
use crate::error::AgentError;
use crate::masking::{describe_connection, format_optional_secret};
use serde::Serialize;
use serde_json::{Value, json};

/// Print a value to stdout as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), AgentError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print error to stderr in the contract format: error: <category>: <message>
pub fn print_error(err: &AgentError) {
    eprintln!("error: {}", err);
}

/// Resolved configuration with credentials masked unless `show_secrets`.
pub fn describe_config(agent: &AgentConfig, connections: &ConnectionConfig) -> Value {
    let show = agent.show_secrets;
    json!({
        "agent": {
            "control_plane_url": agent.control_plane_url,
            "api_key": format_optional_secret(agent.api_key.as_ref(), show),
            "agent_id": agent.agent_id,
            "production": agent.production,
            "sync_enabled": agent.sync_enabled(),
            "sync_interval_ms": agent.sync_interval.as_millis() as u64,
            "enable_caching": agent.enable_caching,
            "cache_ttl_secs": agent.cache_ttl.as_secs(),
            "query_timeout_secs": agent.query_timeout_secs,
            "listen": format!("{}:{}", agent.host, agent.port),
            "local_config_path": agent.local_config_path.display().to_string(),
        },
        "connectors": {
            "sqlserver": connections.sqlserver.as_ref().map(|c| json!({
                "connection_string": describe_connection(&c.connection_string, show),
                "trust_server_certificate": c.trust_server_certificate,
            })),
            "postgresql": connections.postgres.as_ref().map(|url| describe_connection(url, show)),
            "mysql": connections.mysql.as_ref().map(|url| describe_connection(url, show)),
            "rest-api": connections.rest.as_ref().map(|c| json!({
                "base_url": c.base_url,
                "api_key": format_optional_secret(c.api_key.as_ref(), show),
            })),
            "firestore": connections.firestore.as_ref().map(|c| json!({
                "project_id": c.project_id,
            })),
        },
    })
}

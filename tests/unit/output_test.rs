use flexboard_agent::cli::AgentArgs;
use flexboard_agent::config::{ConnectionConfig, RestConfig, SqlServerConfig, load_agent_config};
use flexboard_agent::error::AgentError;
use flexboard_agent::output::{describe_config, print_json};
use secrecy::SecretString;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

fn agent(show_secrets: bool) -> flexboard_agent::config::AgentConfig {
    let args = AgentArgs {
        control_plane_url: Some("https://control.example.com".to_string()),
        api_key: Some("agent-secret-key".to_string()),
        local_config_path: Some(PathBuf::from("/var/lib/flexboard/widget-config.json")),
        ..AgentArgs::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let config_file = dir.path().join("config.toml");
    std::fs::write(&config_file, "").unwrap();
    load_agent_config(&args, false, show_secrets, Some(&config_file)).unwrap()
}

fn connections() -> ConnectionConfig {
    ConnectionConfig {
        sqlserver: Some(SqlServerConfig {
            connection_string: SecretString::from(
                "server=tcp:db,1433;user=sa;password=hunter2".to_string(),
            ),
            trust_server_certificate: true,
        }),
        postgres: Some(SecretString::from("postgres://app:hunter2@pg/sales".to_string())),
        rest: Some(RestConfig {
            base_url: "http://svc.local".to_string(),
            api_key: Some(SecretString::from("rest-secret".to_string())),
            health_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
        }),
        query_timeout_secs: 60,
        ..ConnectionConfig::default()
    }
}

#[test]
fn test_describe_config_masks_credentials() {
    let described = describe_config(&agent(false), &connections());
    let text = described.to_string();

    assert!(!text.contains("agent-secret-key"));
    assert!(!text.contains("hunter2"));
    assert!(!text.contains("rest-secret"));

    assert_eq!(described["agent"]["api_key"], "[REDACTED]");
    assert_eq!(
        described["connectors"]["postgresql"],
        "postgres://app:[REDACTED]@pg/sales"
    );
    assert_eq!(
        described["connectors"]["sqlserver"]["connection_string"],
        "[REDACTED]"
    );
    assert!(described["connectors"]["mysql"].is_null());
}

#[test]
fn test_describe_config_shows_secrets_on_request() {
    let described = describe_config(&agent(true), &connections());
    assert_eq!(described["agent"]["api_key"], "agent-secret-key");
    assert_eq!(described["connectors"]["rest-api"]["api_key"], "rest-secret");
}

#[test]
fn test_describe_config_reports_agent_settings() {
    let described = describe_config(&agent(false), &connections());
    let agent = &described["agent"];
    assert_eq!(agent["sync_enabled"], true);
    assert_eq!(agent["sync_interval_ms"], 300_000);
    assert_eq!(agent["listen"], "0.0.0.0:3001");
    assert_eq!(
        agent["local_config_path"],
        "/var/lib/flexboard/widget-config.json"
    );
}

#[test]
fn test_print_json_succeeds() {
    assert!(print_json(&json!({"success": true})).is_ok());
}

#[test]
fn test_error_display_matches_cli_contract() {
    let err = AgentError::Config {
        message: "CONTROL_PLANE_URL is required in production".to_string(),
    };
    assert_eq!(
        format!("error: {}", err),
        "error: config: CONTROL_PLANE_URL is required in production"
    );
    assert_eq!(
        AgentError::Timeout { seconds: 60 }.to_string(),
        "timeout: query timed out after 60s"
    );
}

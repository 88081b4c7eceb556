use crate::logging::LogFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "flexboard-agent",
    version,
    about = "On-premise query agent for Flexboard dashboards"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "FLEXBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit debug diagnostics to stderr
    #[arg(short = 'v', long, global = true, env = "FLEXBOARD_VERBOSE")]
    pub verbose: bool,

    /// Disable credential masking
    #[arg(long, global = true, env = "FLEXBOARD_SHOW_SECRETS")]
    pub show_secrets: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "FLEXBOARD_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent API and the control-plane sync loop
    Serve(AgentArgs),

    /// Run a single sync attempt against the control plane
    Sync(AgentArgs),

    /// Test every configured connector
    #[command(name = "test-connections")]
    TestConnections(AgentArgs),

    /// Execute a widget's query from the local configuration file
    Query(QueryArgs),

    /// Print the resolved configuration
    #[command(name = "show-config")]
    ShowConfig(AgentArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct AgentArgs {
    /// Control plane base URL
    #[arg(long, env = "CONTROL_PLANE_URL")]
    pub control_plane_url: Option<String>,

    /// API key presented to the control plane
    #[arg(long, env = "FLEXBOARD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Agent identity reported to the control plane
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Deployment environment; "production" requires control plane settings
    #[arg(long, env = "FLEXBOARD_ENV")]
    pub environment: Option<String>,

    /// Sync interval in milliseconds (default: 300000)
    #[arg(long, env = "SYNC_INTERVAL")]
    pub sync_interval: Option<u64>,

    /// Result cache TTL in seconds (default: 300)
    #[arg(long, env = "CACHE_TTL")]
    pub cache_ttl: Option<u64>,

    /// Cache successful widget results
    #[arg(long, env = "ENABLE_CACHING", value_parser = clap::builder::BoolishValueParser::new())]
    pub enable_caching: Option<bool>,

    /// Listen address (default: 0.0.0.0)
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Listen port (default: 3001)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Where the last synced widget configuration is persisted
    #[arg(long, env = "LOCAL_CONFIG_PATH")]
    pub local_config_path: Option<PathBuf>,

    /// Relational query timeout in seconds (default: 60)
    #[arg(short = 't', long, env = "QUERY_TIMEOUT")]
    pub query_timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Widget identifier to execute
    pub widget_id: String,

    /// Query parameter override, as name=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    #[command(flatten)]
    pub agent: AgentArgs,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

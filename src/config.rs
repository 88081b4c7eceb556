use crate::cli::AgentArgs;
use crate::error::AgentError;
use crate::query::BackendKind;
use directories::ProjectDirs;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";

const REST_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const REST_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level agent configuration.
#[derive(Debug)]
pub struct AgentConfig {
    pub control_plane_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub agent_id: Option<String>,
    pub production: bool,
    pub sync_interval: Duration,
    pub cache_ttl: Duration,
    pub enable_caching: bool,
    pub host: String,
    pub port: u16,
    pub local_config_path: PathBuf,
    pub query_timeout_secs: u64,
    pub verbose: bool,
    pub show_secrets: bool,
}

impl AgentConfig {
    /// Whether the control-plane sync loop can run.
    pub fn sync_enabled(&self) -> bool {
        self.control_plane_url.is_some() && self.api_key.is_some()
    }
}

/// Per-backend connection parameters, read once from the environment.
///
/// A backend whose variables are absent is simply not registered.
#[derive(Debug, Default)]
pub struct ConnectionConfig {
    pub sqlserver: Option<SqlServerConfig>,
    pub postgres: Option<SecretString>,
    pub mysql: Option<SecretString>,
    pub rest: Option<RestConfig>,
    pub firestore: Option<FirestoreConfig>,
    pub query_timeout_secs: u64,
}

/// SQL Server target: an ADO-style connection string.
#[derive(Debug)]
pub struct SqlServerConfig {
    pub connection_string: SecretString,
    pub trust_server_certificate: bool,
}

#[derive(Debug)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub health_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
}

impl ConnectionConfig {
    /// Build from process environment variables.
    pub fn from_env(query_timeout_secs: u64) -> Self {
        Self::from_lookup(env_non_empty, query_timeout_secs)
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, query_timeout_secs: u64) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sqlserver = get("SQL_SERVER_CONNECTION_STRING").map(|conn| SqlServerConfig {
            connection_string: SecretString::from(conn),
            trust_server_certificate: get("SQL_SERVER_TRUST_SERVER_CERTIFICATE")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
        });

        let rest = get("REST_API_BASE_URL").map(|url| RestConfig {
            base_url: url.trim_end_matches('/').to_string(),
            api_key: get("REST_API_KEY").map(SecretString::from),
            health_timeout: REST_HEALTH_TIMEOUT,
            query_timeout: REST_QUERY_TIMEOUT,
        });

        Self {
            sqlserver,
            postgres: get("POSTGRESQL_CONNECTION_STRING").map(SecretString::from),
            mysql: get("MYSQL_CONNECTION_STRING").map(SecretString::from),
            rest,
            firestore: get("FIRESTORE_PROJECT_ID").map(|project_id| FirestoreConfig { project_id }),
            query_timeout_secs,
        }
    }

    /// Backend kinds that have a configuration, in registry order.
    pub fn configured_kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                BackendKind::SqlServer => self.sqlserver.is_some(),
                BackendKind::PostgreSql => self.postgres.is_some(),
                BackendKind::MySql => self.mysql.is_some(),
                BackendKind::RestApi => self.rest.is_some(),
                BackendKind::Firestore => self.firestore.is_some(),
            })
            .collect()
    }
}

// --- TOML config file structs ---

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    agent: TomlAgent,
}

#[derive(Debug, Deserialize, Default)]
struct TomlAgent {
    control_plane_url: Option<String>,
    api_key: Option<String>,
    api_key_env: Option<String>,
    agent_id: Option<String>,
    environment: Option<String>,
    sync_interval_ms: Option<u64>,
    cache_ttl_secs: Option<u64>,
    enable_caching: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    local_config_path: Option<PathBuf>,
    query_timeout_secs: Option<u64>,
    verbose: Option<bool>,
}

/// Config path resolution result — distinguishes explicit vs auto-resolved paths.
struct ResolvedConfigPath {
    path: PathBuf,
    /// true if user explicitly specified via --config or FLEXBOARD_CONFIG
    explicit: bool,
}

/// Resolve the config file path: --config flag (or its env var) > platform default.
fn resolve_config_path(cli_config: Option<&PathBuf>) -> Option<ResolvedConfigPath> {
    if let Some(path) = cli_config {
        return Some(ResolvedConfigPath {
            path: path.clone(),
            explicit: true,
        });
    }
    ProjectDirs::from("", "", "flexboard-agent").map(|dirs| ResolvedConfigPath {
        path: dirs.config_dir().join("config.toml"),
        explicit: false,
    })
}

/// Load and parse the TOML config file (if it exists).
fn load_toml_config(resolved: Option<&ResolvedConfigPath>) -> Result<TomlConfig, AgentError> {
    let resolved = match resolved {
        Some(r) => r,
        None => return Ok(TomlConfig::default()),
    };

    if !resolved.path.exists() {
        if resolved.explicit {
            return Err(AgentError::Config {
                message: format!("config file not found: {}", resolved.path.display()),
            });
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&resolved.path).map_err(|e| AgentError::Config {
        message: format!("cannot read config file {}: {}", resolved.path.display(), e),
    })?;

    toml::from_str(&content).map_err(|e| AgentError::Config {
        message: format!("invalid config file {}: {}", resolved.path.display(), e),
    })
}

/// Treat empty strings as absent.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Read an environment variable, treating empty values as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// `SecretString` is deliberately not `Clone`.
pub fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Resolve a secret from direct value, env indirection, or file value.
fn resolve_secret(
    direct: Option<&str>,
    env_key: Option<&str>,
    file_value: Option<&str>,
) -> Option<SecretString> {
    if let Some(val) = non_empty(direct) {
        return Some(SecretString::from(val.to_string()));
    }
    // Env indirection (e.g., api_key_env = "MY_AGENT_KEY")
    if let Some(key) = env_key
        && let Some(val) = env_non_empty(key)
    {
        return Some(SecretString::from(val));
    }
    non_empty(file_value).map(|val| SecretString::from(val.to_string()))
}

fn default_local_config_path() -> PathBuf {
    ProjectDirs::from("", "", "flexboard-agent")
        .map(|dirs| dirs.data_dir().join("widget-config.json"))
        .unwrap_or_else(|| PathBuf::from("widget-config.json"))
}

/// Build AgentConfig from CLI args (which already carry env values).
pub fn load_agent_config(
    args: &AgentArgs,
    verbose: bool,
    show_secrets: bool,
    config_path: Option<&PathBuf>,
) -> Result<AgentConfig, AgentError> {
    let resolved_path = resolve_config_path(config_path);
    let file = load_toml_config(resolved_path.as_ref())?.agent;

    // control plane: CLI/ENV > TOML
    let control_plane_url = non_empty(args.control_plane_url.as_deref())
        .or(non_empty(file.control_plane_url.as_deref()))
        .map(|url| url.trim_end_matches('/').to_string());

    let api_key = resolve_secret(
        args.api_key.as_deref(),
        file.api_key_env.as_deref(),
        file.api_key.as_deref(),
    );

    let environment = non_empty(args.environment.as_deref())
        .or(non_empty(file.environment.as_deref()))
        .unwrap_or("development");
    let production = environment.eq_ignore_ascii_case("production");

    if production {
        if control_plane_url.is_none() {
            return Err(AgentError::Config {
                message: "CONTROL_PLANE_URL is required in production".to_string(),
            });
        }
        if api_key.is_none() {
            return Err(AgentError::Config {
                message: "FLEXBOARD_API_KEY is required in production".to_string(),
            });
        }
    }

    let sync_interval_ms = args
        .sync_interval
        .or(file.sync_interval_ms)
        .unwrap_or(DEFAULT_SYNC_INTERVAL_MS);
    if sync_interval_ms == 0 {
        return Err(AgentError::Config {
            message: "SYNC_INTERVAL must be greater than zero".to_string(),
        });
    }

    let cache_ttl_secs = args
        .cache_ttl
        .or(file.cache_ttl_secs)
        .unwrap_or(DEFAULT_CACHE_TTL_SECS);

    let query_timeout_secs = args
        .query_timeout
        .or(file.query_timeout_secs)
        .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

    let local_config_path = args
        .local_config_path
        .clone()
        .or(file.local_config_path)
        .unwrap_or_else(default_local_config_path);

    Ok(AgentConfig {
        control_plane_url,
        api_key,
        agent_id: non_empty(args.agent_id.as_deref())
            .or(non_empty(file.agent_id.as_deref()))
            .map(str::to_string),
        production,
        sync_interval: Duration::from_millis(sync_interval_ms),
        cache_ttl: Duration::from_secs(cache_ttl_secs),
        enable_caching: args.enable_caching.or(file.enable_caching).unwrap_or(false),
        host: non_empty(args.host.as_deref())
            .or(non_empty(file.host.as_deref()))
            .unwrap_or(DEFAULT_HOST)
            .to_string(),
        port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
        local_config_path,
        query_timeout_secs,
        verbose: verbose || file.verbose.unwrap_or(false),
        show_secrets,
    })
}

use anyhow::Context;
use clap::Parser;
use flexboard_agent::cache::ResultCache;
use flexboard_agent::cli::{AgentArgs, Cli, Command, QueryArgs};
use flexboard_agent::config::{self, AgentConfig, ConnectionConfig};
use flexboard_agent::engine::{Engine, QueryExecutor};
use flexboard_agent::error::AgentError;
use flexboard_agent::query::Params;
use flexboard_agent::server::{self, AppState};
use flexboard_agent::serving::execute_widget;
use flexboard_agent::snapshot::ConfigStore;
use flexboard_agent::sync::SyncClient;
use flexboard_agent::{logging, output};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Load .env file (optional, ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let config_path = cli.config.as_ref();
    let result: anyhow::Result<()> = match &cli.command {
        Command::Serve(args) => serve(args, &cli, config_path).await,
        Command::Sync(args) => sync_once(args, &cli, config_path).await.map_err(Into::into),
        Command::TestConnections(args) => {
            test_connections(args, &cli, config_path).await.map_err(Into::into)
        }
        Command::Query(args) => query(args, &cli, config_path).await.map_err(Into::into),
        Command::ShowConfig(args) => show_config(args, &cli, config_path).map_err(Into::into),
    };

    if let Err(err) = result {
        match err.downcast_ref::<AgentError>() {
            Some(agent_err) => output::print_error(agent_err),
            None => eprintln!("error: {:#}", err),
        }
        process::exit(1);
    }
}

fn load(
    args: &AgentArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> Result<AgentConfig, AgentError> {
    config::load_agent_config(args, cli.verbose, cli.show_secrets, config_path)
}

async fn serve(
    args: &AgentArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> anyhow::Result<()> {
    let agent = load(args, cli, config_path)?;
    let engine = Arc::new(Engine::from_config(ConnectionConfig::from_env(
        agent.query_timeout_secs,
    ))?);
    let store = Arc::new(ConfigStore::new(agent.local_config_path.clone()));

    let sync = SyncClient::from_config(&agent, Arc::clone(&store))?.map(Arc::new);
    let sync_task = match &sync {
        Some(client) => Some(tokio::spawn(Arc::clone(client).run_periodic())),
        None => {
            warn!("CONTROL_PLANE_URL or FLEXBOARD_API_KEY not set; control plane sync disabled");
            if let Err(e) = store.load_local() {
                warn!(path = %store.path().display(), error = %e, "no local configuration loaded");
            }
            None
        }
    };

    let cache = agent
        .enable_caching
        .then(|| Arc::new(ResultCache::new(agent.cache_ttl)));

    let addr: SocketAddr = format!("{}:{}", agent.host, agent.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", agent.host, agent.port))?;

    let state = AppState {
        engine,
        store,
        sync,
        cache,
    };

    server::serve(state, addr, shutdown_signal()).await?;

    if let Some(task) = sync_task {
        task.abort();
    }
    info!("agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn sync_once(
    args: &AgentArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> Result<(), AgentError> {
    let agent = load(args, cli, config_path)?;
    let store = Arc::new(ConfigStore::new(agent.local_config_path.clone()));
    let client = SyncClient::from_config(&agent, Arc::clone(&store))?
        .ok_or(AgentError::SyncDisabled)?;

    let outcome = client.sync_now().await?;
    output::print_json(&json!({
        "success": true,
        "config_version": store.version(),
        "local_config_path": store.path().display().to_string(),
        "result": outcome,
    }))
}

async fn test_connections(
    args: &AgentArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> Result<(), AgentError> {
    let agent = load(args, cli, config_path)?;
    let engine = Engine::from_config(ConnectionConfig::from_env(agent.query_timeout_secs))?;

    let results: serde_json::Map<String, Value> = engine
        .test_all_connections()
        .await
        .into_iter()
        .map(|(kind, ok)| (kind.to_string(), Value::Bool(ok)))
        .collect();
    let failed = results.values().filter(|ok| **ok == Value::Bool(false)).count();

    output::print_json(&json!({ "results": results }))?;
    if failed > 0 {
        return Err(AgentError::Connection {
            message: format!("{} connector(s) failed the connection test", failed),
        });
    }
    Ok(())
}

async fn query(
    args: &QueryArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> Result<(), AgentError> {
    let agent = load(&args.agent, cli, config_path)?;
    let engine = Engine::from_config(ConnectionConfig::from_env(agent.query_timeout_secs))?;
    let store = ConfigStore::new(agent.local_config_path.clone());

    let overrides: Params = args
        .params
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();

    let execution = execute_widget(&engine, &store, None, &args.widget_id, overrides).await?;
    let result = &execution.result;
    output::print_json(&json!({
        "success": result.success,
        "data": result.data,
        "error": result.error,
        "metadata": execution.metadata(),
    }))?;

    if !result.success {
        return Err(AgentError::Query {
            message: result.error.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

fn show_config(
    args: &AgentArgs,
    cli: &Cli,
    config_path: Option<&PathBuf>,
) -> Result<(), AgentError> {
    let agent = load(args, cli, config_path)?;
    let connections = ConnectionConfig::from_env(agent.query_timeout_secs);
    output::print_json(&output::describe_config(&agent, &connections))
}

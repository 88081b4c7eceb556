use crate::cache::ResultCache;
use crate::engine::QueryExecutor;
use crate::error::AgentError;
use crate::query::Params;
use crate::serving::execute_widget;
use crate::snapshot::ConfigStore;
use crate::sync::{AGENT_VERSION, SyncClient};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handles behind every route.
pub struct AppState<E> {
    pub engine: Arc<E>,
    pub store: Arc<ConfigStore>,
    pub sync: Option<Arc<SyncClient>>,
    pub cache: Option<Arc<ResultCache>>,
}

// Manual impl: deriving would require `E: Clone`
impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            sync: self.sync.clone(),
            cache: self.cache.clone(),
        }
    }
}

pub fn router<E: QueryExecutor>(state: AppState<E>) -> Router {
    Router::new()
        .route("/api/data/:widget_id", get(widget_data::<E>))
        .route("/api/health", get(health::<E>))
        .route("/api/sync", post(trigger_sync::<E>))
        .route("/api/connectors", get(list_connectors::<E>))
        .route("/api/connectors/test", get(test_connectors::<E>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<E: QueryExecutor>(
    state: AppState<E>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "agent API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn widget_data<E: QueryExecutor>(
    State(state): State<AppState<E>>,
    Path(widget_id): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<Response, AgentError> {
    let overrides: Params = query
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();

    let execution = execute_widget(
        state.engine.as_ref(),
        &state.store,
        state.cache.as_deref(),
        &widget_id,
        overrides,
    )
    .await?;

    let metadata = execution.metadata();
    if !execution.result.success {
        let body = json!({
            "success": false,
            "error": execution.result.error,
            "metadata": metadata,
        });
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response());
    }

    let body = json!({
        "success": true,
        "data": execution.result.data,
        "metadata": metadata,
    });
    Ok(Json(body).into_response())
}

async fn health<E: QueryExecutor>(State(state): State<AppState<E>>) -> Response {
    let active = state.store.resolve().ok();
    let status = state.sync.as_ref().map(|s| s.status()).unwrap_or_default();

    let (code, label) = match active {
        Some(_) => (StatusCode::OK, "healthy"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    let body = json!({
        "status": label,
        "version": AGENT_VERSION,
        "sync_status": {
            "control_plane_url": state.sync.as_ref().map(|s| s.control_plane_url()),
            "last_sync": status.last_success.map(|t| t.to_rfc3339()),
            "config_version": active.as_ref().map(|a| a.version()),
            "config_source": active.as_ref().map(|a| a.source),
            "next_sync_in": state.sync.as_ref().and_then(|s| s.next_sync_in()),
            "last_error": status.last_error,
        },
    });
    (code, Json(body)).into_response()
}

async fn trigger_sync<E: QueryExecutor>(
    State(state): State<AppState<E>>,
) -> Result<Json<Value>, AgentError> {
    let sync = state.sync.as_ref().ok_or(AgentError::SyncDisabled)?;
    let outcome = sync.sync_now().await?;
    Ok(Json(json!({
        "success": true,
        "config_version": state.store.version(),
        "timestamp": Utc::now().to_rfc3339(),
        "result": outcome,
    })))
}

async fn list_connectors<E: QueryExecutor>(State(state): State<AppState<E>>) -> Json<Value> {
    Json(json!({ "connectors": state.engine.available_connectors() }))
}

async fn test_connectors<E: QueryExecutor>(State(state): State<AppState<E>>) -> Json<Value> {
    let results: BTreeMap<&'static str, bool> = state
        .engine
        .test_all_connections()
        .await
        .into_iter()
        .map(|(kind, ok)| (kind.as_str(), ok))
        .collect();
    Json(json!({ "results": results }))
}

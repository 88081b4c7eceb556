pub mod firestore;
pub mod mysql;
pub mod postgres;
pub mod rest;
pub mod sqlserver;

use crate::error::AgentError;
use crate::logging::Timer;
use crate::query::{BackendKind, Params, QueryResult, QuerySpec, RowSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub use firestore::FirestoreConnector;
pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use rest::RestConnector;
pub use sqlserver::SqlServerConnector;

/// Capability set every data backend provides.
///
/// Neither operation fails: connection problems resolve to `false`, query
/// problems to a `QueryResult` with `success == false`.
pub trait Connector {
    fn kind(&self) -> BackendKind;

    fn test_connection(&self) -> impl Future<Output = bool> + Send;

    fn execute_query(
        &self,
        query: &QuerySpec,
        params: &Params,
    ) -> impl Future<Output = QueryResult> + Send;
}

/// Closed set of connectors the engine can register.
pub enum AnyConnector {
    SqlServer(SqlServerConnector),
    Postgres(PostgresConnector),
    MySql(MySqlConnector),
    Rest(RestConnector),
    Firestore(FirestoreConnector),
}

impl Connector for AnyConnector {
    fn kind(&self) -> BackendKind {
        match self {
            AnyConnector::SqlServer(c) => c.kind(),
            AnyConnector::Postgres(c) => c.kind(),
            AnyConnector::MySql(c) => c.kind(),
            AnyConnector::Rest(c) => c.kind(),
            AnyConnector::Firestore(c) => c.kind(),
        }
    }

    async fn test_connection(&self) -> bool {
        match self {
            AnyConnector::SqlServer(c) => c.test_connection().await,
            AnyConnector::Postgres(c) => c.test_connection().await,
            AnyConnector::MySql(c) => c.test_connection().await,
            AnyConnector::Rest(c) => c.test_connection().await,
            AnyConnector::Firestore(c) => c.test_connection().await,
        }
    }

    async fn execute_query(&self, query: &QuerySpec, params: &Params) -> QueryResult {
        match self {
            AnyConnector::SqlServer(c) => c.execute_query(query, params).await,
            AnyConnector::Postgres(c) => c.execute_query(query, params).await,
            AnyConnector::MySql(c) => c.execute_query(query, params).await,
            AnyConnector::Rest(c) => c.execute_query(query, params).await,
            AnyConnector::Firestore(c) => c.execute_query(query, params).await,
        }
    }
}

// --- Helpers shared by connector implementations ---

/// Run a query future and normalize its outcome into a `QueryResult`.
///
/// Execution time covers everything the future does, connection setup
/// included.
pub(crate) async fn run_query<F>(kind: BackendKind, fut: F) -> QueryResult
where
    F: Future<Output = Result<RowSet, AgentError>>,
{
    let timer = Timer::start();
    match fut.await {
        Ok(rows) => {
            let elapsed = timer.elapsed_ms();
            debug!(backend = %kind, rows = rows.data.len(), elapsed_ms = elapsed, "query complete");
            QueryResult::success(rows, elapsed)
        }
        Err(err) => {
            let elapsed = timer.elapsed_ms();
            warn!(backend = %kind, error = %err, elapsed_ms = elapsed, "query failed");
            QueryResult::failure(err.to_string(), elapsed)
        }
    }
}

/// Run a connection probe, logging and flattening failures to `false`.
pub(crate) async fn run_probe<F>(kind: BackendKind, fut: F) -> bool
where
    F: Future<Output = Result<(), AgentError>>,
{
    match fut.await {
        Ok(()) => {
            debug!(backend = %kind, "connection test passed");
            true
        }
        Err(err) => {
            warn!(backend = %kind, error = %err, "connection test failed");
            false
        }
    }
}

/// Bound a driver call by the configured query timeout.
pub(crate) async fn with_timeout<T, F>(seconds: u64, fut: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    tokio::time::timeout(Duration::from_secs(seconds), fut)
        .await
        .map_err(|_| AgentError::Timeout { seconds })?
}

/// Render a JSON parameter as text for drivers that only take strings.
pub(crate) fn json_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON number for a float, or null for NaN and infinities.
pub(crate) fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Decimal as a JSON number when an f64 holds it exactly, otherwise as its
/// exact decimal text so no digit is lost.
pub(crate) fn decimal_to_json(d: rust_decimal::Decimal) -> serde_json::Value {
    let text = d.to_string();
    let exact = text
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(|f| f.to_string().parse::<rust_decimal::Decimal>().ok())
        .is_some_and(|round_trip| round_trip == d);
    if exact {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            return value;
        }
    }
    serde_json::Value::String(text)
}

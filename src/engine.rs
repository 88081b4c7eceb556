use crate::config::ConnectionConfig;
use crate::connector::{
    AnyConnector, Connector, FirestoreConnector, MySqlConnector, PostgresConnector,
    RestConnector, SqlServerConnector,
};
use crate::error::AgentError;
use crate::logging::Timer;
use crate::query::{BackendKind, QueryRequest, QueryResult};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

/// What the HTTP layer and the CLI need from a query engine.
pub trait QueryExecutor: Send + Sync + 'static {
    fn execute_query(&self, request: QueryRequest) -> impl Future<Output = QueryResult> + Send;

    fn test_all_connections(&self)
    -> impl Future<Output = BTreeMap<BackendKind, bool>> + Send;

    fn available_connectors(&self) -> Vec<BackendKind>;
}

/// Registry of configured connectors, one per backend kind.
///
/// Holds no per-query state: results are built fresh for every call and
/// never retained.
#[derive(Default)]
pub struct Engine {
    connectors: BTreeMap<BackendKind, AnyConnector>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector for every backend whose configuration is present.
    pub fn from_config(config: ConnectionConfig) -> Result<Self, AgentError> {
        let timeout = config.query_timeout_secs;
        let mut engine = Self::new();

        if let Some(sqlserver) = config.sqlserver {
            engine.register(AnyConnector::SqlServer(SqlServerConnector::new(
                sqlserver, timeout,
            )));
        }
        if let Some(url) = config.postgres {
            engine.register(AnyConnector::Postgres(PostgresConnector::new(url, timeout)?));
        }
        if let Some(url) = config.mysql {
            engine.register(AnyConnector::MySql(MySqlConnector::new(url, timeout)));
        }
        if let Some(rest) = config.rest {
            engine.register(AnyConnector::Rest(RestConnector::new(rest)?));
        }
        if let Some(firestore) = config.firestore {
            engine.register(AnyConnector::Firestore(FirestoreConnector::new(firestore)));
        }

        info!(connectors = ?engine.available_connectors(), "connectors registered");
        Ok(engine)
    }

    /// Add a connector, replacing any existing one for the same kind.
    pub fn register(&mut self, connector: AnyConnector) {
        self.connectors.insert(connector.kind(), connector);
    }
}

impl QueryExecutor for Engine {
    async fn execute_query(&self, request: QueryRequest) -> QueryResult {
        let timer = Timer::start();
        let Some(connector) = self.connectors.get(&request.kind) else {
            let err = AgentError::UnsupportedSource {
                kind: request.kind.to_string(),
            };
            return QueryResult::failure(err.to_string(), timer.elapsed_ms());
        };

        match guarded(connector.execute_query(&request.query, &request.params)).await {
            Ok(result) => result,
            Err(message) => {
                error!(
                    backend = %request.kind,
                    widget_id = request.widget_id.as_deref().unwrap_or(""),
                    panic = %message,
                    "connector panicked during query"
                );
                QueryResult::failure(
                    format!("connector panicked: {}", message),
                    timer.elapsed_ms(),
                )
            }
        }
    }

    async fn test_all_connections(&self) -> BTreeMap<BackendKind, bool> {
        let probes = self.connectors.iter().map(|(kind, connector)| async move {
            let ok = guarded(connector.test_connection())
                .await
                .unwrap_or_else(|message| {
                    error!(
                        backend = %kind,
                        panic = %message,
                        "connector panicked during connection test"
                    );
                    false
                });
            (*kind, ok)
        });

        futures::future::join_all(probes).await.into_iter().collect()
    }

    fn available_connectors(&self) -> Vec<BackendKind> {
        self.connectors.keys().copied().collect()
    }
}

/// Await `fut`, turning a panic inside it into its message.
async fn guarded<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

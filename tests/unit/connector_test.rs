mod support;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use flexboard_agent::config::RestConfig;
use flexboard_agent::connector::postgres::PgTlsMode;
use flexboard_agent::connector::{Connector, PostgresConnector, RestConnector};
use flexboard_agent::query::{Params, QuerySpec};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

fn rest_connector(base_url: &str, api_key: Option<&str>) -> RestConnector {
    RestConnector::new(RestConfig {
        base_url: base_url.to_string(),
        api_key: api_key.map(|k| SecretString::from(k.to_string())),
        health_timeout: Duration::from_secs(5),
        query_timeout: Duration::from_secs(30),
    })
    .unwrap()
}

/// Data service that echoes each query back as a single row.
async fn echo_service() -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route(
            "/query",
            post(
                |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push((auth, body.clone()));
                    Json(json!({
                        "data": [{"query": body["query"], "region": body["params"]["region"]}],
                        "columns": ["query", "region"],
                        "rowCount": 1,
                        "metadata": {"source": "echo"},
                    }))
                },
            ),
        )
        .with_state(Arc::clone(&seen));
    (support::spawn_server(router).await, seen)
}

/// Data service answering every route with `status`.
async fn status_service(status: StatusCode) -> String {
    let router = Router::new()
        .route("/health", get(move || async move { status }))
        .route("/query", post(move || async move { (status, "nope") }));
    support::spawn_server(router).await
}

// --- REST ---

#[tokio::test]
async fn test_rest_health_probe_passes() {
    let (url, _) = echo_service().await;
    assert!(rest_connector(&url, None).test_connection().await);
}

#[tokio::test]
async fn test_rest_health_probe_fails_on_error_status() {
    let url = status_service(StatusCode::SERVICE_UNAVAILABLE).await;
    assert!(!rest_connector(&url, None).test_connection().await);
}

#[tokio::test]
async fn test_rest_health_probe_fails_when_unreachable() {
    let addr = support::unreachable_addr().await;
    let connector = rest_connector(&format!("http://{}", addr), None);
    assert!(!connector.test_connection().await);
}

#[tokio::test]
async fn test_rest_query_passes_response_through() {
    let (url, seen) = echo_service().await;
    let connector = rest_connector(&url, Some("svc-key"));

    let mut params = Params::new();
    params.insert("region".to_string(), json!("EMEA"));
    let result = connector
        .execute_query(&QuerySpec::from("sales_by_region"), &params)
        .await;

    assert!(result.success, "Got: {:?}", result.error);
    assert_eq!(result.columns, vec!["query", "region"]);
    assert_eq!(result.row_count, 1);
    assert_eq!(
        result.data,
        vec![json!({"query": "sales_by_region", "region": "EMEA"})]
    );
    assert_eq!(result.metadata, Some(json!({"source": "echo"})));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer svc-key"));
    assert_eq!(seen[0].1["params"]["region"], "EMEA");
}

#[tokio::test]
async fn test_rest_descriptor_query_sent_as_json() {
    let (url, seen) = echo_service().await;
    let connector = rest_connector(&url, None);

    let descriptor = QuerySpec::Descriptor(json!({"endpoint": "orders", "limit": 10}));
    let result = connector.execute_query(&descriptor, &Params::new()).await;

    assert!(result.success);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, None);
    assert_eq!(seen[0].1["query"]["endpoint"], "orders");
}

#[tokio::test]
async fn test_rest_error_status_becomes_failure() {
    let url = status_service(StatusCode::BAD_GATEWAY).await;
    let result = rest_connector(&url, None)
        .execute_query(&QuerySpec::from("anything"), &Params::new())
        .await;

    assert!(!result.success);
    assert!(
        result.error.as_deref().unwrap().contains("HTTP error: 502"),
        "Got: {:?}",
        result.error
    );
}

#[tokio::test]
async fn test_rest_unauthorized_is_auth_failure() {
    let url = status_service(StatusCode::UNAUTHORIZED).await;
    let result = rest_connector(&url, Some("wrong"))
        .execute_query(&QuerySpec::from("anything"), &Params::new())
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("auth:"));
}

#[tokio::test]
async fn test_rest_reported_failure_is_surfaced() {
    let router = Router::new().route(
        "/query",
        post(|| async { Json(json!({"success": false, "error": "unknown report"})) }),
    );
    let url = support::spawn_server(router).await;

    let result = rest_connector(&url, None)
        .execute_query(&QuerySpec::from("missing"), &Params::new())
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("query: unknown report"));
}

// --- PostgreSQL ---

#[tokio::test]
async fn test_postgres_unreachable_reports_elapsed_time() {
    let addr = support::unreachable_addr().await;
    let connector = PostgresConnector::new(
        SecretString::from(format!("postgres://app:pw@{}/app", addr)),
        5,
    )
    .unwrap();

    let result = connector
        .execute_query(&QuerySpec::from("SELECT 1"), &Params::new())
        .await;
    assert!(!result.success);
    assert!(result.error.is_some());
    assert!(result.data.is_empty());
}

#[tokio::test]
async fn test_postgres_sslmode_require_selects_tls() {
    let addr = support::unreachable_addr().await;
    let connector = PostgresConnector::new(
        SecretString::from(format!("postgres://app:pw@{}/app?sslmode=require", addr)),
        5,
    )
    .unwrap();
    assert_eq!(connector.tls_mode(), PgTlsMode::Require);
    assert!(!connector.test_connection().await);

    let plain = PostgresConnector::new(
        SecretString::from(format!("postgres://app:pw@{}/app", addr)),
        5,
    )
    .unwrap();
    assert_eq!(plain.tls_mode(), PgTlsMode::Plain);
}

#[test]
fn test_postgres_unknown_sslmode_is_config_error() {
    let err = PostgresConnector::new(
        SecretString::from("postgres://app:pw@db/app?sslmode=sometimes".to_string()),
        5,
    )
    .err()
    .expect("unknown sslmode should be rejected");
    assert!(err.to_string().starts_with("config:"), "Got: {}", err);
}

/// Needs a reachable server in POSTGRESQL_CONNECTION_STRING.
#[tokio::test]
#[ignore]
async fn test_postgres_invalid_query_against_live_server() {
    let url = std::env::var("POSTGRESQL_CONNECTION_STRING")
        .expect("POSTGRESQL_CONNECTION_STRING must be set");
    let connector = PostgresConnector::new(SecretString::from(url), 10).unwrap();

    assert!(connector.test_connection().await);

    let result = connector
        .execute_query(&QuerySpec::from("SELECT * FROM no_such_table_here"), &Params::new())
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("no_such_table_here"));

    let mut params = Params::new();
    params.insert("n".to_string(), json!(41));
    let result = connector
        .execute_query(&QuerySpec::from("SELECT @n::int + 1 AS answer"), &params)
        .await;
    assert!(result.success, "Got: {:?}", result.error);
    assert_eq!(result.columns, vec!["answer"]);
    assert_eq!(result.data, vec![json!([42])]);
}

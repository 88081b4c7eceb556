use crate::connector::{
    Connector, decimal_to_json, float_to_json, json_to_text, run_probe, run_query, with_timeout,
};
use crate::error::AgentError;
use crate::params::{BoundQuery, PlaceholderStyle, bind_named};
use crate::query::{BackendKind, Params, QueryResult, QuerySpec, RowSet};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Transport security requested by the connection string's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgTlsMode {
    /// `disable`, `allow`, `prefer` or no `sslmode`: plain TCP.
    Plain,
    /// `require`: TLS with certificates checked against the webpki roots.
    Require,
    /// `verify-ca` / `verify-full`: same verified TLS as `require`.
    Verify,
}

impl PgTlsMode {
    pub fn uses_tls(self) -> bool {
        self != PgTlsMode::Plain
    }
}

/// Read `sslmode` from a URL (`?sslmode=`) or key/value (`sslmode=`)
/// connection string. Returns the mode and the string to hand to
/// tokio-postgres, which only understands `disable`/`prefer`/`require`.
pub fn parse_ssl_mode(connection_string: &str) -> Result<(PgTlsMode, String), AgentError> {
    let Some(start) = connection_string.find("sslmode=") else {
        return Ok((PgTlsMode::Plain, connection_string.to_string()));
    };
    let value_start = start + "sslmode=".len();
    let value_end = connection_string[value_start..]
        .find(|c: char| c == '&' || c.is_whitespace())
        .map_or(connection_string.len(), |n| value_start + n);
    let value = &connection_string[value_start..value_end];

    let mode = match value.to_ascii_lowercase().as_str() {
        "disable" | "allow" | "prefer" => PgTlsMode::Plain,
        "require" => PgTlsMode::Require,
        "verify-ca" | "verify-full" => PgTlsMode::Verify,
        other => {
            return Err(AgentError::Config {
                message: format!("unsupported PostgreSQL sslmode: {}", other),
            });
        }
    };

    let driver_mode = match mode {
        PgTlsMode::Plain => "disable",
        PgTlsMode::Require | PgTlsMode::Verify => "require",
    };
    let normalized = format!(
        "{}{}{}",
        &connection_string[..value_start],
        driver_mode,
        &connection_string[value_end..]
    );
    Ok((mode, normalized))
}

fn rustls_connector() -> Result<MakeRustlsConnect, AgentError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| AgentError::Config {
        message: format!("failed to build TLS configuration: {}", e),
    })?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

/// PostgreSQL through tokio-postgres. Opens one connection per call.
pub struct PostgresConnector {
    url: SecretString,
    tls: PgTlsMode,
    timeout_secs: u64,
}

impl PostgresConnector {
    pub fn new(url: SecretString, timeout_secs: u64) -> Result<Self, AgentError> {
        let (tls, url) = parse_ssl_mode(url.expose_secret())?;
        Ok(Self {
            url: SecretString::from(url),
            tls,
            timeout_secs,
        })
    }

    pub fn tls_mode(&self) -> PgTlsMode {
        self.tls
    }

    async fn connect(&self) -> Result<(Client, JoinHandle<()>), AgentError> {
        let url = self.url.expose_secret();
        let connect_err = |e: tokio_postgres::Error| AgentError::Connection {
            message: format!("connection failed: {}", pg_message(&e)),
        };

        // The connection object drives the socket until the client is dropped
        if self.tls.uses_tls() {
            let (client, connection) = tokio_postgres::connect(url, rustls_connector()?)
                .await
                .map_err(connect_err)?;
            let handle = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(error = %e, "postgres TLS connection closed with error");
                }
            });
            Ok((client, handle))
        } else {
            let (client, connection) = tokio_postgres::connect(url, NoTls)
                .await
                .map_err(connect_err)?;
            let handle = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!(error = %e, "postgres connection closed with error");
                }
            });
            Ok((client, handle))
        }
    }

    async fn run(&self, query: &QuerySpec, params: &Params) -> Result<RowSet, AgentError> {
        let bound = bind_named(query.sql()?, params, PlaceholderStyle::Dollar);

        let (client, handle) = self.connect().await?;
        let outcome = fetch_rows(&client, &bound).await;
        drop(client);
        let _ = handle.await;
        outcome
    }

    async fn probe(&self) -> Result<(), AgentError> {
        let (client, handle) = self.connect().await?;
        let outcome = client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| AgentError::Query {
                message: pg_message(&e),
            });
        drop(client);
        let _ = handle.await;
        outcome
    }
}

impl Connector for PostgresConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::PostgreSql
    }

    async fn test_connection(&self) -> bool {
        run_probe(self.kind(), with_timeout(self.timeout_secs, self.probe())).await
    }

    async fn execute_query(&self, query: &QuerySpec, params: &Params) -> QueryResult {
        run_query(
            self.kind(),
            with_timeout(self.timeout_secs, self.run(query, params)),
        )
        .await
    }
}

/// Server-side message for database errors, the generic display otherwise.
fn pg_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

async fn fetch_rows(client: &Client, bound: &BoundQuery) -> Result<RowSet, AgentError> {
    let statement = client
        .prepare(&bound.sql)
        .await
        .map_err(|e| AgentError::Query {
            message: pg_message(&e),
        })?;

    let declared = statement.params();
    if declared.len() != bound.values.len() {
        return Err(AgentError::Query {
            message: format!(
                "query expects {} parameters, {} supplied",
                declared.len(),
                bound.values.len()
            ),
        });
    }

    // The server's declared parameter types drive the JSON conversion
    let boxed: Vec<BoxedParam> = declared
        .iter()
        .zip(&bound.values)
        .map(|(ty, value)| json_to_sql(value, ty))
        .collect::<Result<_, _>>()?;
    let refs: Vec<&(dyn ToSql + Sync)> = boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect();

    let rows = client
        .query(&statement, &refs)
        .await
        .map_err(|e| AgentError::Query {
            message: pg_message(&e),
        })?;

    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let data = rows
        .iter()
        .map(|row| {
            Value::Array(
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| pg_cell_to_json(row, idx, col.type_()))
                    .collect(),
            )
        })
        .collect();

    Ok(RowSet {
        columns,
        data,
        ..RowSet::default()
    })
}

// --- Parameter conversion ---

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    Some(json_to_text(value))
}

/// JSON null becomes SQL NULL; anything else must convert or the bind fails.
fn typed<T>(
    value: &Value,
    ty: &Type,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>, AgentError> {
    if value.is_null() {
        return Ok(None);
    }
    convert(value).map(Some).ok_or_else(|| AgentError::Query {
        message: format!("cannot bind {} as {}", value, ty),
    })
}

fn json_to_sql(value: &Value, ty: &Type) -> Result<BoxedParam, AgentError> {
    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(typed(value, ty, as_bool)?),
        Type::INT2 => Box::new(typed(value, ty, |v| {
            as_i64(v).and_then(|n| i16::try_from(n).ok())
        })?),
        Type::INT4 => Box::new(typed(value, ty, |v| {
            as_i64(v).and_then(|n| i32::try_from(n).ok())
        })?),
        Type::INT8 => Box::new(typed(value, ty, as_i64)?),
        Type::FLOAT4 => Box::new(typed(value, ty, |v| as_f64(v).map(|f| f as f32))?),
        Type::FLOAT8 => Box::new(typed(value, ty, as_f64)?),
        Type::NUMERIC => Box::new(typed(value, ty, |v| {
            Decimal::from_str(json_to_text(v).trim()).ok()
        })?),
        Type::JSON | Type::JSONB => Box::new(typed(value, ty, |v| Some(v.clone()))?),
        Type::TIMESTAMP => Box::new(typed(value, ty, |v| {
            let text = json_to_text(v);
            chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
        })?),
        Type::TIMESTAMPTZ => Box::new(typed(value, ty, |v| {
            chrono::DateTime::parse_from_rfc3339(&json_to_text(v))
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc))
        })?),
        Type::DATE => Box::new(typed(value, ty, |v| {
            chrono::NaiveDate::parse_from_str(&json_to_text(v), "%Y-%m-%d").ok()
        })?),
        Type::UUID => Box::new(typed(value, ty, |v| {
            uuid::Uuid::parse_str(&json_to_text(v)).ok()
        })?),
        _ => Box::new(typed(value, ty, as_text)?),
    };
    Ok(param)
}

// --- Row decoding ---

fn cell<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn pg_cell_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => cell::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => cell::<i16>(row, idx).map(Value::from),
        Type::INT4 => cell::<i32>(row, idx).map(Value::from),
        Type::INT8 => cell::<i64>(row, idx).map(Value::from),
        Type::OID => cell::<u32>(row, idx).map(Value::from),
        Type::FLOAT4 => cell::<f32>(row, idx).map(|f| float_to_json(f64::from(f))),
        Type::FLOAT8 => cell::<f64>(row, idx).map(float_to_json),
        Type::NUMERIC => cell::<Decimal>(row, idx).map(decimal_to_json),
        Type::JSON | Type::JSONB => cell::<Value>(row, idx),
        Type::TIMESTAMP => cell::<chrono::NaiveDateTime>(row, idx)
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => cell::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|dt| Value::String(dt.to_rfc3339())),
        Type::DATE => cell::<chrono::NaiveDate>(row, idx)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        Type::TIME => cell::<chrono::NaiveTime>(row, idx)
            .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        Type::UUID => cell::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        _ => cell::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

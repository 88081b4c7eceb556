use crate::connector::{Connector, float_to_json, run_probe, run_query, with_timeout};
use crate::error::AgentError;
use crate::params::{BoundQuery, PlaceholderStyle, bind_named};
use crate::query::{BackendKind, Params, QueryResult, QuerySpec, RowSet};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, Row};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

/// MySQL over the binary protocol. Opens one connection per call.
pub struct MySqlConnector {
    url: SecretString,
    timeout_secs: u64,
}

impl MySqlConnector {
    pub fn new(url: SecretString, timeout_secs: u64) -> Self {
        Self { url, timeout_secs }
    }

    async fn connect(&self) -> Result<Conn, AgentError> {
        let opts = Opts::from_url(self.url.expose_secret()).map_err(|e| AgentError::Config {
            message: format!("invalid MySQL connection string: {}", e),
        })?;
        Conn::new(opts).await.map_err(|e| AgentError::Connection {
            message: format!("connection failed: {}", e),
        })
    }

    async fn run(&self, query: &QuerySpec, params: &Params) -> Result<RowSet, AgentError> {
        let bound = bind_named(query.sql()?, params, PlaceholderStyle::Question);

        let mut conn = self.connect().await?;
        let outcome = fetch_rows(&mut conn, &bound).await;
        if let Err(e) = conn.disconnect().await {
            debug!(error = %e, "error closing MySQL connection");
        }
        outcome
    }

    async fn probe(&self) -> Result<(), AgentError> {
        let mut conn = self.connect().await?;
        let outcome = conn
            .query_drop("SELECT 1")
            .await
            .map_err(|e| AgentError::Query {
                message: e.to_string(),
            });
        conn.disconnect().await.ok();
        outcome
    }
}

impl Connector for MySqlConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::MySql
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

async fn fetch_rows(conn: &mut Conn, bound: &BoundQuery) -> Result<RowSet, AgentError> {
    let params = if bound.values.is_empty() {
        mysql_async::Params::Empty
    } else {
        mysql_async::Params::Positional(bound.values.iter().map(json_to_mysql).collect())
    };

    let mut result = conn
        .exec_iter(bound.sql.as_str(), params)
        .await
        .map_err(|e| AgentError::Query {
            message: e.to_string(),
        })?;

    // Column descriptors must be read before the rows are drained
    let columns: Vec<String> = result
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();

    let rows: Vec<Row> = result.collect().await.map_err(|e| AgentError::Query {
        message: format!("failed to fetch rows: {}", e),
    })?;

    let data = rows
        .iter()
        .map(|row| {
            Value::Array(
                (0..row.len())
                    .map(|idx| row.as_ref(idx).map(mysql_to_json).unwrap_or(Value::Null))
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

fn json_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                mysql_async::Value::UInt(u)
            } else {
                mysql_async::Value::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => mysql_async::Value::Bytes(s.as_bytes().to_vec()),
        other => mysql_async::Value::Bytes(other.to_string().into_bytes()),
    }
}

fn mysql_to_json(value: &mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::from(bytes.clone()),
        },
        mysql_async::Value::Int(i) => Value::from(*i),
        mysql_async::Value::UInt(u) => Value::from(*u),
        mysql_async::Value::Float(f) => float_to_json(f64::from(*f)),
        mysql_async::Value::Double(d) => float_to_json(*d),
        mysql_async::Value::Date(year, month, day, hour, minute, second, micros) => {
            if (*hour, *minute, *second, *micros) == (0, 0, 0, 0) {
                Value::String(format!("{:04}-{:02}-{:02}", year, month, day))
            } else {
                Value::String(format!(
                    "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
                    year, month, day, hour, minute, second, micros
                ))
            }
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            Value::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                sign, total_hours, minutes, seconds, micros
            ))
        }
    }
}

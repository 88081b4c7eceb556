use crate::config::SqlServerConfig;
use crate::connector::{
    Connector, decimal_to_json, float_to_json, json_to_text, run_probe, run_query, with_timeout,
};
use crate::error::AgentError;
use crate::params::{BoundQuery, PlaceholderStyle, bind_named};
use crate::query::{BackendKind, Params, QueryResult, QuerySpec, RowSet};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::borrow::Cow;
use tiberius::numeric::Numeric;
use tiberius::{Client, ColumnData, Config, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server over TDS. Opens one connection per call.
pub struct SqlServerConnector {
    connection_string: SecretString,
    trust_server_certificate: bool,
    timeout_secs: u64,
}

impl SqlServerConnector {
    pub fn new(config: SqlServerConfig, timeout_secs: u64) -> Self {
        Self {
            connection_string: config.connection_string,
            trust_server_certificate: config.trust_server_certificate,
            timeout_secs,
        }
    }

    fn tds_config(&self) -> Result<Config, AgentError> {
        let mut config = Config::from_ado_string(self.connection_string.expose_secret())
            .map_err(|e| AgentError::Config {
                message: format!("invalid SQL Server connection string: {}", e),
            })?;
        if self.trust_server_certificate {
            config.trust_cert();
        }
        Ok(config)
    }

    async fn connect(&self) -> Result<TdsClient, AgentError> {
        let config = self.tds_config()?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| AgentError::Connection {
                message: format!("connection failed: {}", e),
            })?;
        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| AgentError::Connection {
                message: format!("failed to authenticate: {}", e),
            })
    }

    async fn run(&self, query: &QuerySpec, params: &Params) -> Result<RowSet, AgentError> {
        let bound = bind_named(query.sql()?, params, PlaceholderStyle::Tds);

        let mut client = self.connect().await?;
        let outcome = fetch_rows(&mut client, &bound).await;
        if let Err(e) = client.close().await {
            debug!(error = %e, "error closing SQL Server connection");
        }
        outcome
    }

    async fn probe(&self) -> Result<(), AgentError> {
        let mut client = self.connect().await?;
        let outcome = select_one(&mut client).await;
        if let Err(e) = client.close().await {
            debug!(error = %e, "error closing SQL Server connection");
        }
        outcome
    }
}

impl Connector for SqlServerConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::SqlServer
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

/// The stream borrows the client, so it is drained before the caller closes it.
async fn select_one(client: &mut TdsClient) -> Result<(), AgentError> {
    let stream = client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| AgentError::Query {
            message: e.to_string(),
        })?;
    stream
        .into_row()
        .await
        .map(|_| ())
        .map_err(|e| AgentError::Query {
            message: e.to_string(),
        })
}

/// Borrowed JSON value bound as a typed TDS parameter.
struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ColumnData::I64(Some(i)),
                None => ColumnData::F64(n.as_f64()),
            },
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            other => ColumnData::String(Some(Cow::Owned(json_to_text(other)))),
        }
    }
}

async fn fetch_rows(client: &mut TdsClient, bound: &BoundQuery) -> Result<RowSet, AgentError> {
    let tds_params: Vec<SqlParam<'_>> = bound.values.iter().map(SqlParam).collect();
    let refs: Vec<&dyn ToSql> = tds_params.iter().map(|p| p as &dyn ToSql).collect();

    let stream = client
        .query(bound.sql.as_str(), &refs)
        .await
        .map_err(|e| AgentError::Query {
            message: e.to_string(),
        })?;

    let rows = stream
        .into_first_result()
        .await
        .map_err(|e| AgentError::Query {
            message: format!("failed to fetch rows: {}", e),
        })?;

    // TDS rows carry their own column metadata; the first row names the columns
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let data = rows
        .into_iter()
        .map(|row| Value::Array(row.into_iter().map(cell_to_json).collect()))
        .collect();

    Ok(RowSet {
        columns,
        data,
        ..RowSet::default()
    })
}

fn cell_to_json(cell: ColumnData<'static>) -> Value {
    match cell {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|f| float_to_json(f64::from(f))).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(float_to_json).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v.map(|b| Value::from(b.into_owned())).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v.map(numeric_to_json).unwrap_or(Value::Null),
        other => temporal_to_json(&other),
    }
}

/// DECIMAL/NUMERIC/MONEY. Precision beyond 28 digits does not fit a
/// `Decimal` and is rendered from the raw integer and scale.
fn numeric_to_json(n: Numeric) -> Value {
    match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
        Ok(d) => decimal_to_json(d),
        Err(_) => Value::String(numeric_text(n.value(), n.scale())),
    }
}

fn numeric_text(value: i128, scale: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (int, frac) = padded.split_at(padded.len() - scale);
    format!("{sign}{int}.{frac}")
}

/// Date/time cells, decoded through tiberius' chrono conversions.
fn temporal_to_json(cell: &ColumnData<'static>) -> Value {
    if let Ok(Some(dt)) = chrono::DateTime::<chrono::FixedOffset>::from_sql(cell) {
        return Value::String(dt.to_rfc3339());
    }
    if let Ok(Some(dt)) = chrono::NaiveDateTime::from_sql(cell) {
        return Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = chrono::NaiveDate::from_sql(cell) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(t)) = chrono::NaiveTime::from_sql(cell) {
        return Value::String(t.format("%H:%M:%S%.f").to_string());
    }
    Value::Null
}

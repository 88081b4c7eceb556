use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Named query parameters, ordered by name.
pub type Params = BTreeMap<String, Value>;

/// The data backends a connector can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "sqlserver")]
    SqlServer,
    #[serde(rename = "postgresql")]
    PostgreSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "rest-api")]
    RestApi,
    #[serde(rename = "firestore")]
    Firestore,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::SqlServer,
        BackendKind::PostgreSql,
        BackendKind::MySql,
        BackendKind::RestApi,
        BackendKind::Firestore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SqlServer => "sqlserver",
            BackendKind::PostgreSql => "postgresql",
            BackendKind::MySql => "mysql",
            BackendKind::RestApi => "rest-api",
            BackendKind::Firestore => "firestore",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(BackendKind::SqlServer),
            "postgresql" | "postgres" => Ok(BackendKind::PostgreSql),
            "mysql" => Ok(BackendKind::MySql),
            "rest-api" | "rest" => Ok(BackendKind::RestApi),
            "firestore" => Ok(BackendKind::Firestore),
            _ => Err(AgentError::UnsupportedSource {
                kind: s.to_string(),
            }),
        }
    }
}

/// Query text for SQL backends, or a backend-specific JSON descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySpec {
    Text(String),
    Descriptor(Value),
}

impl QuerySpec {
    /// SQL text, or a query error for descriptor-style queries.
    pub fn sql(&self) -> Result<&str, AgentError> {
        match self {
            QuerySpec::Text(sql) => Ok(sql),
            QuerySpec::Descriptor(_) => Err(AgentError::Query {
                message: "expected SQL text, got a query descriptor".to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            QuerySpec::Text(sql) => Value::String(sql.clone()),
            QuerySpec::Descriptor(value) => value.clone(),
        }
    }
}

impl From<&str> for QuerySpec {
    fn from(sql: &str) -> Self {
        QuerySpec::Text(sql.to_string())
    }
}

/// A single query to route through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: BackendKind,
    pub query: QuerySpec,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl QueryRequest {
    pub fn new(kind: BackendKind, query: impl Into<QuerySpec>) -> Self {
        Self {
            kind,
            query: query.into(),
            params: Params::new(),
            widget_id: None,
            tenant_id: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }
}

/// Normalized outcome of a query, whichever backend ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub execution_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl QueryResult {
    pub fn success(rows: RowSet, execution_time: u64) -> Self {
        let row_count = rows.row_count.unwrap_or(rows.data.len());
        Self {
            success: true,
            data: rows.data,
            columns: rows.columns,
            row_count,
            execution_time,
            error: None,
            metadata: rows.metadata,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time: u64) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            execution_time,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Rows produced by a connector before timing is attached.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub data: Vec<Value>,
    /// Backend-reported count, when it differs from `data.len()`.
    pub row_count: Option<usize>,
    pub metadata: Option<Value>,
}

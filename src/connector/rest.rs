use crate::config::RestConfig;
use crate::connector::{Connector, run_probe, run_query};
use crate::error::AgentError;
use crate::query::{BackendKind, Params, QueryResult, QuerySpec, RowSet};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Generic HTTP data service exposing `/health` and `/query`.
pub struct RestConnector {
    base_url: String,
    api_key: Option<SecretString>,
    health_timeout: Duration,
    query_timeout: Duration,
    client: Client,
}

#[derive(Serialize)]
struct RestQueryRequest<'a> {
    query: Value,
    params: &'a Params,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestQueryResponse {
    success: Option<bool>,
    error: Option<String>,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    columns: Vec<String>,
    row_count: Option<usize>,
    metadata: Option<Value>,
}

impl RestConnector {
    pub fn new(config: RestConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .user_agent(concat!("flexboard-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            base_url: config.base_url,
            api_key: config.api_key,
            health_timeout: config.health_timeout,
            query_timeout: config.query_timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn map_http_error(status: u16) -> AgentError {
        match status {
            401 => AgentError::Auth {
                message: "invalid or expired API key".to_string(),
            },
            403 => AgentError::Auth {
                message: "API key lacks permission for this query".to_string(),
            },
            _ => AgentError::Connection {
                message: format!("HTTP error: {}", status),
            },
        }
    }

    async fn probe(&self) -> Result<(), AgentError> {
        let resp = self
            .authorize(self.client.get(self.url("health")))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| AgentError::Connection {
                message: format!("health check failed: {}", e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16()));
        }
        Ok(())
    }

    async fn run(&self, query: &QuerySpec, params: &Params) -> Result<RowSet, AgentError> {
        let request = RestQueryRequest {
            query: query.to_json(),
            params,
        };

        let resp = self
            .authorize(self.client.post(self.url("query")))
            .timeout(self.query_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout {
                        seconds: self.query_timeout.as_secs(),
                    }
                } else {
                    AgentError::Connection {
                        message: format!("failed to execute query: {}", e),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::map_http_error(status.as_u16()));
        }

        let response: RestQueryResponse = resp.json().await.map_err(|e| AgentError::Query {
            message: format!("failed to parse response: {}", e),
        })?;

        if response.success == Some(false) {
            return Err(AgentError::Query {
                message: response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(RowSet {
            columns: response.columns,
            data: response.data,
            row_count: response.row_count,
            metadata: response.metadata,
        })
    }
}

impl Connector for RestConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::RestApi
    }

    async fn test_connection(&self) -> bool {
        run_probe(self.kind(), self.probe()).await
    }

    async fn execute_query(&self, query: &QuerySpec, params: &Params) -> QueryResult {
        run_query(self.kind(), self.run(query, params)).await
    }
}

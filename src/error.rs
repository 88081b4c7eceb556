use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config: {message}")]
    Config { message: String },

    #[error("connection: {message}")]
    Connection { message: String },

    #[error("query: {message}")]
    Query { message: String },

    #[error("timeout: query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("auth: {message}")]
    Auth { message: String },

    #[error("sync: {message}")]
    Sync { message: String },

    #[error("sync: control plane sync is not configured")]
    SyncDisabled,

    #[error("sync: sync already in progress")]
    SyncInProgress,

    #[error("Widget configuration not found for: {widget_id}")]
    WidgetNotFound { widget_id: String },

    #[error("Configuration not available")]
    ConfigUnavailable,

    #[error("unsupported data source type: {kind}")]
    UnsupportedSource { kind: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// HTTP status used when this error reaches the agent API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::WidgetNotFound { .. } => StatusCode::NOT_FOUND,
            AgentError::ConfigUnavailable | AgentError::SyncDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AgentError::SyncInProgress => StatusCode::CONFLICT,
            AgentError::Sync { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

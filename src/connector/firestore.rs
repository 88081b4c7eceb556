use crate::config::FirestoreConfig;
use crate::connector::Connector;
use crate::query::{BackendKind, Params, QueryResult, QuerySpec};
use serde_json::json;
use tracing::warn;

pub const NOT_IMPLEMENTED: &str = "firestore queries are not implemented";

/// Document-store placeholder: registered when a project id is configured,
/// but every query reports that it cannot run.
pub struct FirestoreConnector {
    project_id: String,
}

impl FirestoreConnector {
    pub fn new(config: FirestoreConfig) -> Self {
        Self {
            project_id: config.project_id,
        }
    }
}

impl Connector for FirestoreConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Firestore
    }

    async fn test_connection(&self) -> bool {
        !self.project_id.trim().is_empty()
    }

    async fn execute_query(&self, _query: &QuerySpec, _params: &Params) -> QueryResult {
        warn!(project_id = %self.project_id, "firestore query requested but not supported");
        QueryResult::failure(NOT_IMPLEMENTED, 0).with_metadata(json!({
            "not_implemented": true,
            "project_id": self.project_id,
        }))
    }
}

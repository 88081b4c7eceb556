use crate::cache::{CacheKey, ResultCache};
use crate::engine::QueryExecutor;
use crate::error::AgentError;
use crate::query::{BackendKind, Params, QueryRequest, QueryResult};
use crate::snapshot::{ActiveConfig, ConfigStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// A widget query that reached the engine, with the configuration it ran
/// against.
#[derive(Debug)]
pub struct WidgetExecution {
    pub widget_id: String,
    pub visualization: String,
    pub kind: BackendKind,
    pub active: Arc<ActiveConfig>,
    pub result: QueryResult,
    pub cached: bool,
}

impl WidgetExecution {
    /// Provenance block returned alongside the rows.
    pub fn metadata(&self) -> Value {
        json!({
            "widget_id": self.widget_id,
            "type": self.visualization,
            "data_source": self.kind,
            "config_source": self.active.source,
            "last_sync": self.active.synced_at.map(|t| t.to_rfc3339()),
            "config_version": self.active.version(),
            "columns": self.result.columns,
            "row_count": self.result.row_count,
            "execution_time": self.result.execution_time,
            "cached": self.cached,
        })
    }
}

/// Resolve `widget_id` against the active configuration and run its query.
///
/// Request parameters override the widget's defaults. Resolution failures
/// are errors; a query that ran and failed is returned as an execution with
/// `result.success == false`.
pub async fn execute_widget<E: QueryExecutor>(
    engine: &E,
    store: &ConfigStore,
    cache: Option<&ResultCache>,
    widget_id: &str,
    overrides: Params,
) -> Result<WidgetExecution, AgentError> {
    let active = store.resolve()?;
    let widget = active.widget(widget_id)?;
    let kind = widget.backend()?;

    let mut params = widget.params.clone();
    params.extend(overrides);

    let key = CacheKey::new(active.source, active.version(), widget_id, &params);
    if let Some(hit) = cache.and_then(|c| c.get(&key)) {
        debug!(widget_id, "serving cached result");
        return Ok(WidgetExecution {
            widget_id: widget_id.to_string(),
            visualization: widget.visualization.clone(),
            kind,
            active: Arc::clone(&active),
            result: hit,
            cached: true,
        });
    }

    let request = QueryRequest::new(kind, widget.query.clone())
        .with_params(params)
        .with_widget(widget_id);
    let result = engine.execute_query(request).await;

    if let Some(cache) = cache {
        cache.insert(key, &result);
    }

    Ok(WidgetExecution {
        widget_id: widget_id.to_string(),
        visualization: widget.visualization.clone(),
        kind,
        active: Arc::clone(&active),
        result,
        cached: false,
    })
}

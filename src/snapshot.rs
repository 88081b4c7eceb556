use crate::error::AgentError;
use crate::query::{BackendKind, Params, QuerySpec};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One widget's query definition as published by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub query: QuerySpec,

    #[serde(rename = "type", default)]
    pub visualization: String,

    /// Backend kind name; `sqlserver` when absent.
    #[serde(
        default,
        alias = "dataSource",
        skip_serializing_if = "Option::is_none"
    )]
    pub data_source: Option<String>,

    /// Default parameter values, overridable per request.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,

    /// Fields the agent does not interpret, kept so persistence is lossless.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WidgetConfig {
    pub fn new(query: impl Into<QuerySpec>, visualization: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            visualization: visualization.into(),
            data_source: None,
            params: Params::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn backend(&self) -> Result<BackendKind, AgentError> {
        match self.data_source.as_deref() {
            None => Ok(BackendKind::SqlServer),
            Some(s) if s.trim().is_empty() => Ok(BackendKind::SqlServer),
            Some(s) => s.parse(),
        }
    }
}

/// Widget id → definition. This is also the on-disk file format.
pub type WidgetMap = BTreeMap<String, WidgetConfig>;

/// The unit of sync: replaced whole, never merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub widgets: WidgetMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    ControlPlane,
    LocalFile,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::ControlPlane => "control_plane",
            ConfigSource::LocalFile => "local_file",
        }
    }
}

/// The snapshot currently serving queries, with its provenance.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    pub snapshot: ConfigSnapshot,
    pub source: ConfigSource,
    /// When the snapshot arrived from the control plane; `None` for file loads.
    pub synced_at: Option<DateTime<Utc>>,
}

impl ActiveConfig {
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    pub fn widget(&self, widget_id: &str) -> Result<&WidgetConfig, AgentError> {
        self.snapshot
            .widgets
            .get(widget_id)
            .ok_or_else(|| AgentError::WidgetNotFound {
                widget_id: widget_id.to_string(),
            })
    }
}

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied {
        version: u64,
        /// Set when the snapshot went live but could not be written to disk.
        persist_error: Option<String>,
    },
    Stale {
        offered: u64,
        current: u64,
    },
}

/// Holds the active configuration and owns its on-disk copy.
///
/// Readers clone the `Arc` and never hold the lock across awaits, so a swap
/// never disturbs a query already running against the previous snapshot.
pub struct ConfigStore {
    active: RwLock<Option<Arc<ActiveConfig>>>,
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            active: RwLock::new(None),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<Arc<ActiveConfig>> {
        self.active.read().clone()
    }

    /// Version of the active snapshot, 0 when nothing is active.
    pub fn version(&self) -> u64 {
        self.active.read().as_ref().map_or(0, |a| a.version())
    }

    /// Make a control-plane snapshot active and persist it.
    ///
    /// A snapshot whose version does not exceed the active one is ignored,
    /// unless nothing is active yet.
    pub fn apply(&self, snapshot: ConfigSnapshot, synced_at: DateTime<Utc>) -> ApplyOutcome {
        let next = {
            let mut guard = self.active.write();
            if let Some(current) = guard.as_ref()
                && snapshot.version <= current.version()
            {
                return ApplyOutcome::Stale {
                    offered: snapshot.version,
                    current: current.version(),
                };
            }
            let next = Arc::new(ActiveConfig {
                snapshot,
                source: ConfigSource::ControlPlane,
                synced_at: Some(synced_at),
            });
            *guard = Some(Arc::clone(&next));
            next
        };

        let version = next.version();
        info!(
            version,
            widgets = next.snapshot.widgets.len(),
            "configuration updated from control plane"
        );

        let persist_error = match self.persist(&next.snapshot.widgets) {
            Ok(()) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to persist configuration");
                Some(e.to_string())
            }
        };

        ApplyOutcome::Applied {
            version,
            persist_error,
        }
    }

    /// Activate the on-disk snapshot if nothing is active yet.
    ///
    /// Returns whatever is active afterwards.
    pub fn load_local(&self) -> Result<Arc<ActiveConfig>, AgentError> {
        if let Some(current) = self.current() {
            return Ok(current);
        }

        let widgets = self.read_local()?;
        let mut guard = self.active.write();
        // Another task may have activated a snapshot while the file was read
        if let Some(current) = guard.as_ref() {
            return Ok(Arc::clone(current));
        }

        info!(
            path = %self.path.display(),
            widgets = widgets.len(),
            "loaded configuration from local file"
        );
        let loaded = Arc::new(ActiveConfig {
            snapshot: ConfigSnapshot {
                version: 0,
                widgets,
            },
            source: ConfigSource::LocalFile,
            synced_at: None,
        });
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// The active snapshot, falling back to the local file.
    pub fn resolve(&self) -> Result<Arc<ActiveConfig>, AgentError> {
        self.load_local().map_err(|e| {
            debug!(error = %e, "no configuration available");
            AgentError::ConfigUnavailable
        })
    }

    pub fn read_local(&self) -> Result<WidgetMap, AgentError> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the on-disk file atomically: temp file in the same
    /// directory, fsync, rename.
    pub fn persist(&self, widgets: &WidgetMap) -> Result<(), AgentError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, widgets)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AgentError::Io(e.error))?;

        debug!(path = %self.path.display(), "configuration persisted");
        Ok(())
    }
}

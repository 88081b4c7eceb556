use crate::query::{Params, QueryResult};
use crate::snapshot::ConfigSource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: ConfigSource,
    version: u64,
    widget_id: String,
    params: String,
}

impl CacheKey {
    /// Entries are scoped to one configuration version, so a new snapshot
    /// never serves results computed under the old one.
    pub fn new(source: ConfigSource, version: u64, widget_id: &str, params: &Params) -> Self {
        Self {
            source,
            version,
            widget_id: widget_id.to_string(),
            // BTreeMap serializes in key order, so equal maps give equal keys
            params: serde_json::to_string(params).unwrap_or_default(),
        }
    }
}

/// Entry limit for caches built with [`ResultCache::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Successful widget results kept for a fixed TTL.
///
/// Keys include request parameters, so the map is capped: once full, the
/// oldest entry makes room for the new one.
pub struct ResultCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<CacheKey, (Instant, QueryResult)>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_max_entries(ttl, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<QueryResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, result)) if stored.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                entries.remove(key);
                debug!(widget_id = %key.widget_id, "evicted expired cache entry");
                None
            }
            None => None,
        }
    }

    /// Store a result. Failures are never cached.
    pub fn insert(&self, key: CacheKey, result: &QueryResult) {
        if !result.success {
            return;
        }
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        entries.retain(|_, (stored, _)| stored.elapsed() < ttl);

        while entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (stored, _))| *stored)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            debug!(widget_id = %oldest.widget_id, "evicted oldest cache entry");
        }

        entries.insert(key, (Instant::now(), result.clone()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

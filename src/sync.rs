use crate::config::{AgentConfig, clone_secret};
use crate::error::AgentError;
use crate::logging::Timer;
use crate::snapshot::{ApplyOutcome, ConfigSnapshot, ConfigStore, WidgetMap};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const SYNC_PATH: &str = "api/agent/sync";
const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct SyncRequest {
    pub current_version: u64,
    pub agent_version: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub has_updates: bool,
    #[serde(default)]
    pub latest_version: Option<u64>,
    #[serde(default)]
    pub metadata: Option<SyncMetadata>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncMetadata {
    pub version: u64,
    pub config: WidgetMap,
}

/// Result of one successful round trip to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate { version: u64 },
    Applied { version: u64, persisted: bool },
    Stale { offered: u64, current: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Last time the control plane answered successfully.
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct SyncSettings {
    pub control_plane_url: String,
    pub api_key: SecretString,
    pub agent_id: Option<String>,
    pub interval: Duration,
}

/// Pulls versioned widget configuration from the control plane.
///
/// Attempts never overlap: a second caller while one runs gets
/// `SyncInProgress`.
pub struct SyncClient {
    http: Client,
    control_plane_url: String,
    endpoint: String,
    api_key: SecretString,
    agent_id: Option<String>,
    interval: Duration,
    store: Arc<ConfigStore>,
    in_flight: AtomicBool,
    status: Mutex<SyncStatus>,
    next_sync: Mutex<Option<Instant>>,
}

/// Clears the in-flight flag however the attempt ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncClient {
    pub fn new(settings: SyncSettings, store: Arc<ConfigStore>) -> Result<Self, AgentError> {
        let http = Client::builder()
            .user_agent(concat!("flexboard-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(SYNC_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let control_plane_url = settings.control_plane_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            endpoint: format!("{}/{}", control_plane_url, SYNC_PATH),
            control_plane_url,
            api_key: settings.api_key,
            agent_id: settings.agent_id,
            interval: settings.interval,
            store,
            in_flight: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
            next_sync: Mutex::new(None),
        })
    }

    /// `None` when the control plane URL or API key is missing.
    pub fn from_config(
        config: &AgentConfig,
        store: Arc<ConfigStore>,
    ) -> Result<Option<Self>, AgentError> {
        let (Some(url), Some(key)) = (&config.control_plane_url, &config.api_key) else {
            return Ok(None);
        };
        let settings = SyncSettings {
            control_plane_url: url.clone(),
            api_key: clone_secret(key),
            agent_id: config.agent_id.clone(),
            interval: config.sync_interval,
        };
        Self::new(settings, store).map(Some)
    }

    pub fn control_plane_url(&self) -> &str {
        &self.control_plane_url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    /// Milliseconds until the periodic loop's next attempt, if it is running.
    pub fn next_sync_in(&self) -> Option<u64> {
        let next = *self.next_sync.lock();
        next.map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64)
    }

    fn try_begin(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }

    /// Run one sync attempt now.
    ///
    /// On failure the local file is activated if nothing else is, and the
    /// error is returned to the caller.
    pub async fn sync_now(&self) -> Result<SyncOutcome, AgentError> {
        let Some(_guard) = self.try_begin() else {
            return Err(AgentError::SyncInProgress);
        };

        let timer = Timer::start();
        self.status.lock().last_attempt = Some(Utc::now());

        match self.attempt().await {
            Ok(outcome) => {
                debug!(?outcome, elapsed_ms = timer.elapsed_ms(), "sync complete");
                let mut status = self.status.lock();
                status.last_success = Some(Utc::now());
                status.last_error = None;
                Ok(outcome)
            }
            Err(err) => {
                self.recover(&err);
                Err(err)
            }
        }
    }

    async fn attempt(&self) -> Result<SyncOutcome, AgentError> {
        let current_version = self.store.version();
        let request = SyncRequest {
            current_version,
            agent_version: AGENT_VERSION.to_string(),
        };

        let mut builder = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request);
        if let Some(agent_id) = &self.agent_id {
            builder = builder.header("X-Agent-Id", agent_id);
        }

        let resp = builder.send().await.map_err(|e| AgentError::Sync {
            message: format!("request to control plane failed: {}", e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Sync {
                message: match status.as_u16() {
                    401 | 403 => format!("control plane rejected the API key (HTTP {})", status.as_u16()),
                    code => format!("control plane returned HTTP {}", code),
                },
            });
        }

        let response: SyncResponse = resp.json().await.map_err(|e| AgentError::Sync {
            message: format!("invalid sync response: {}", e),
        })?;

        if !response.success {
            return Err(AgentError::Sync {
                message: response
                    .error
                    .unwrap_or_else(|| "control plane reported failure".to_string()),
            });
        }

        if !response.has_updates {
            debug!(
                version = current_version,
                latest = ?response.latest_version,
                "configuration up to date"
            );
            return Ok(SyncOutcome::UpToDate {
                version: current_version,
            });
        }

        let metadata = response.metadata.ok_or_else(|| AgentError::Sync {
            message: "update offered without metadata".to_string(),
        })?;

        let snapshot = ConfigSnapshot {
            version: metadata.version,
            widgets: metadata.config,
        };

        Ok(match self.store.apply(snapshot, Utc::now()) {
            ApplyOutcome::Applied {
                version,
                persist_error,
            } => SyncOutcome::Applied {
                version,
                persisted: persist_error.is_none(),
            },
            ApplyOutcome::Stale { offered, current } => {
                info!(offered, current, "ignoring configuration that is not newer");
                SyncOutcome::Stale { offered, current }
            }
        })
    }

    fn recover(&self, err: &AgentError) {
        warn!(error = %err, "configuration sync failed");
        self.status.lock().last_error = Some(err.to_string());

        if self.store.current().is_some() {
            return;
        }
        match self.store.load_local() {
            Ok(active) => info!(
                widgets = active.snapshot.widgets.len(),
                "using local configuration until the control plane is reachable"
            ),
            Err(e) => warn!(
                path = %self.store.path().display(),
                error = %e,
                "no local configuration to fall back to"
            ),
        }
    }

    /// Sync immediately, then once per interval, forever.
    ///
    /// Failures are logged and never end the loop.
    pub async fn run_periodic(self: Arc<Self>) {
        info!(
            control_plane = %self.control_plane_url,
            interval_ms = self.interval.as_millis() as u64,
            "starting configuration sync"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            *self.next_sync.lock() = Some(Instant::now() + self.interval);

            // Failures were already logged by recover()
            if let Err(AgentError::SyncInProgress) = self.sync_now().await {
                debug!("sync already running, skipping tick");
            }
        }
    }
}

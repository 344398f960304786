// ── Polling engine ──
//
// Wires the credential manager, gateway, aggregator, and speed-test
// orchestrator together and drives the periodic poll cycle. Query
// operations read atomically published state and never wait on a poll.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rackdash_api::{ApiClient, TransportConfig};

use crate::aggregate::{Aggregator, DeviceSort, Ingested};
use crate::config::EngineConfig;
use crate::credential::{
    AuthState, AuthStatus, CredentialManager, CredentialStore, FileStore, MemoryStore,
};
use crate::error::CoreError;
use crate::model::{
    Device, Distributions, HistoryPoint, Snapshot, SpeedTestResult, SpeedTestRun,
    SpeedTestStatus,
};
use crate::normalize::normalize_records;
use crate::speedtest::SpeedTestOrchestrator;
use crate::upstream::Gateway;

// ── PollStatus ───────────────────────────────────────────────────

/// Outcome bookkeeping for the poll loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// No upstream call is made before this instant after a rate limit.
    pub backoff_until: Option<DateTime<Utc>>,
    /// Records dropped by the normalizer in the last successful poll.
    pub dropped_records: usize,
}

/// Summary of one successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub devices: usize,
    pub dropped: usize,
    pub skipped_disconnected: usize,
}

// ── Engine ───────────────────────────────────────────────────────

/// The main entry point for the HTTP layer. Cheaply cloneable.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    network_id: ArcSwap<String>,
    credentials: CredentialManager,
    gateway: Gateway,
    aggregator: Aggregator,
    speedtest: SpeedTestOrchestrator,
    poll_status: StdMutex<PollStatus>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine whose credential lives at `config.credential_path`
    /// (or in memory when unset). Does not start polling.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let store: Arc<dyn CredentialStore> = match &config.credential_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Build an engine around an explicit credential store.
    pub fn with_store(
        config: EngineConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, CoreError> {
        if config.poll_interval.is_zero() || config.request_timeout.is_zero() {
            return Err(CoreError::Config {
                message: "poll interval and request timeout must be greater than zero".into(),
            });
        }

        let transport = TransportConfig::with_timeout(config.request_timeout);
        let api = ApiClient::new(config.api_base.clone(), &transport)?;
        let credentials = CredentialManager::new(
            api.clone(),
            store,
            config.request_timeout,
            config.token_max_age,
        );
        let gateway = Gateway::new(api, credentials.clone(), config.request_timeout);
        let aggregator = Aggregator::new(config.retention)?;
        let speedtest = SpeedTestOrchestrator::new(
            gateway.clone(),
            config.speedtest_poll_interval,
            config.speedtest_deadline,
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                network_id: ArcSwap::from_pointee(config.network_id.clone()),
                config,
                credentials,
                gateway,
                aggregator,
                speedtest,
                poll_status: StdMutex::new(PollStatus::default()),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the periodic poll task. The first poll runs immediately.
    pub async fn start(&self) {
        let interval = self.inner.config.poll_interval;
        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(poll_task(self.clone(), interval, cancel));
        self.inner.task_handles.lock().await.push(handle);
        info!(
            interval_secs = interval.as_secs(),
            network_id = %self.network_id(),
            "poll loop started"
        );
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("poll loop stopped");
    }

    // ── Poll cycle ───────────────────────────────────────────────

    /// Run one poll cycle: fetch, normalize, ingest.
    ///
    /// Any upstream failure aborts this cycle only; the current snapshot and
    /// history stay as they were.
    pub async fn poll_once(&self) -> Result<PollReport, CoreError> {
        let now = Utc::now();
        if let Some(remaining) = self.backoff_remaining(now) {
            debug!(remaining_secs = remaining.as_secs(), "rate-limit backoff active; skipping poll");
            return Err(CoreError::RateLimited {
                retry_after: remaining,
            });
        }

        self.update_status(|s| s.last_attempt = Some(now));
        let result = self.fetch_and_ingest().await;

        match &result {
            Ok(report) => {
                let at = Utc::now();
                self.update_status(|s| {
                    s.last_success = Some(at);
                    s.last_error = None;
                    s.consecutive_failures = 0;
                    s.backoff_until = None;
                    s.dropped_records = report.dropped;
                });
            }
            Err(e) => {
                let backoff_until = match e {
                    CoreError::RateLimited { retry_after } => TimeDelta::from_std(*retry_after)
                        .ok()
                        .map(|d| Utc::now() + d),
                    _ => None,
                };
                self.update_status(|s| {
                    s.last_error = Some(e.to_string());
                    s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                    s.backoff_until = backoff_until;
                });
            }
        }
        result
    }

    async fn fetch_and_ingest(&self) -> Result<PollReport, CoreError> {
        let network_id = self.network_id();
        if network_id.is_empty() {
            return Err(CoreError::Config {
                message: "no network id configured".into(),
            });
        }

        let records = self
            .inner
            .gateway
            .call("list devices", move |api, token| {
                let network_id = network_id.clone();
                async move { api.list_devices(&network_id, &token).await }
            })
            .await?;

        let total = records.len();
        let records: Vec<Value> = if self.inner.config.include_disconnected {
            records
        } else {
            records.into_iter().filter(|r| !is_disconnected(r)).collect()
        };
        let skipped_disconnected = total - records.len();

        let normalized = normalize_records(records);
        let report = PollReport {
            devices: normalized.devices.len(),
            dropped: normalized.dropped.len(),
            skipped_disconnected,
        };

        let snapshot = Snapshot::new(Utc::now(), normalized.devices);
        if let Ingested::Accepted { evicted } = self.inner.aggregator.ingest(snapshot) {
            info!(
                devices = report.devices,
                dropped = report.dropped,
                skipped_disconnected,
                evicted,
                "poll complete"
            );
        }
        Ok(report)
    }

    fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.poll_status().backoff_until?;
        (until > now).then(|| (until - now).to_std().unwrap_or_default())
    }

    fn update_status(&self, f: impl FnOnce(&mut PollStatus)) {
        let mut status = self
            .inner
            .poll_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    pub fn poll_status(&self) -> PollStatus {
        self.inner
            .poll_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn current_devices(&self, sort: DeviceSort) -> Vec<Device> {
        self.inner.aggregator.current_devices(sort)
    }

    pub fn history(&self) -> Vec<HistoryPoint> {
        self.inner.aggregator.history()
    }

    pub fn distributions(&self) -> Distributions {
        self.inner.aggregator.distributions()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.aggregator.last_updated()
    }

    // ── Speed test ───────────────────────────────────────────────

    pub fn start_speedtest(&self) -> Result<SpeedTestRun, CoreError> {
        let network_id = self.network_id();
        if network_id.is_empty() {
            return Err(CoreError::Config {
                message: "no network id configured".into(),
            });
        }
        self.inner.speedtest.start(&network_id)
    }

    pub fn poll_speedtest(&self) -> SpeedTestRun {
        self.inner.speedtest.poll()
    }

    /// Abandon a stuck or unwanted run. The last completed figures stay.
    pub fn reset_speedtest(&self) -> SpeedTestRun {
        self.inner.speedtest.reset()
    }

    pub fn speedtest_status(&self) -> SpeedTestStatus {
        self.inner.speedtest.status()
    }

    pub fn last_speedtest_result(&self) -> Option<SpeedTestResult> {
        self.inner.speedtest.last_result()
    }

    // ── Administration ───────────────────────────────────────────

    pub async fn begin_authentication(&self, identity: &str) -> Result<(), CoreError> {
        self.inner.credentials.begin_authentication(identity).await
    }

    pub async fn complete_authentication(&self, code: &str) -> Result<(), CoreError> {
        self.inner.credentials.complete_authentication(code).await
    }

    pub async fn reauthorize(&self) -> Result<(), CoreError> {
        self.inner.credentials.reauthorize().await
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.credentials.state()
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.inner.credentials.status(Utc::now())
    }

    pub fn network_id(&self) -> String {
        (**self.inner.network_id.load()).clone()
    }

    /// Point subsequent upstream calls at another network.
    pub fn set_network_id(&self, network_id: &str) -> Result<(), CoreError> {
        let network_id = network_id.trim();
        if network_id.is_empty() || network_id.contains('/') {
            return Err(CoreError::Config {
                message: format!("invalid network id {network_id:?}"),
            });
        }
        self.inner.network_id.store(Arc::new(network_id.to_owned()));
        info!(network_id, "network id updated");
        Ok(())
    }
}

/// Records flagged `connected: false` are left out unless configured otherwise.
fn is_disconnected(record: &Value) -> bool {
    record.get("connected").and_then(Value::as_bool) == Some(false)
}

/// Periodically poll the upstream until cancelled.
async fn poll_task(engine: Engine, interval: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match engine.poll_once().await {
                    Ok(_) => {}
                    Err(e) if e.needs_user() => {
                        warn!(error = %e, "poll skipped; authentication needed");
                    }
                    Err(e) => warn!(error = %e, "poll cycle failed"),
                }
            }
        }
    }
}

// ── Speed-test orchestrator ──
//
// `Idle → Running → {Completed, Failed}`; a new start resets to Idle first,
// and `reset()` abandons a run that is stuck. The upstream job runs in its
// own task and reports back over a oneshot channel. `poll()` only peeks at
// that channel, so status queries never wait on the network and the poll
// loop is never paused.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use rackdash_api::models::SpeedTestProgress;

use crate::error::CoreError;
use crate::model::{SpeedTestResult, SpeedTestRun, SpeedTestState, SpeedTestStatus};
use crate::upstream::Gateway;

/// Terminal outcome reported by a job task.
#[derive(Debug)]
enum JobOutcome {
    Completed(SpeedTestResult),
    Failed(String),
}

#[derive(Debug, Default)]
struct OrchestratorState {
    run: SpeedTestRun,
    last_result: Option<SpeedTestResult>,
    job: Option<oneshot::Receiver<JobOutcome>>,
    task: Option<AbortHandle>,
}

/// Starts and tracks upstream speed tests. Cheaply cloneable.
#[derive(Clone)]
pub struct SpeedTestOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    gateway: Gateway,
    poll_interval: Duration,
    deadline: Duration,
    state: Mutex<OrchestratorState>,
}

impl SpeedTestOrchestrator {
    /// A fresh orchestrator is always `Idle`; in-flight runs do not survive
    /// a restart.
    pub fn new(gateway: Gateway, poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                gateway,
                poll_interval,
                deadline,
                state: Mutex::new(OrchestratorState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch a run against `network_id`.
    ///
    /// Fails with `AlreadyRunning` (leaving the active run untouched) if a
    /// run is in progress. Must be called inside a Tokio runtime.
    pub fn start(&self, network_id: &str) -> Result<SpeedTestRun, CoreError> {
        let mut state = self.lock();
        Self::settle(&mut state);
        if state.run.is_running() {
            return Err(CoreError::AlreadyRunning);
        }

        let (tx, rx) = oneshot::channel();
        let started_at = Utc::now();
        let job = Job {
            gateway: self.inner.gateway.clone(),
            network_id: network_id.to_owned(),
            poll_interval: self.inner.poll_interval,
            deadline: self.inner.deadline,
            started_at,
        };
        let handle = tokio::spawn(async move {
            let outcome = job.run().await;
            // Receiver gone means the run was reset or the orchestrator dropped.
            let _ = tx.send(outcome);
        });

        state.run = SpeedTestRun::running(started_at);
        state.job = Some(rx);
        state.task = Some(handle.abort_handle());
        info!(network_id, "speed test started");
        Ok(state.run.clone())
    }

    /// Abandon the current run and return to `Idle`.
    ///
    /// A job that already finished is folded in first, so its figures still
    /// land in `last_result`. An unfinished job is aborted and its outcome
    /// discarded.
    pub fn reset(&self) -> SpeedTestRun {
        let mut state = self.lock();
        Self::settle(&mut state);
        Self::abandon(&mut state);
        state.run.clone()
    }

    fn abandon(state: &mut OrchestratorState) {
        state.job = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if state.run.is_running() {
            info!("speed test abandoned");
        }
        state.run = SpeedTestRun::default();
    }

    /// Non-blocking status check. Folds a finished job into the run state.
    pub fn poll(&self) -> SpeedTestRun {
        let mut state = self.lock();
        Self::settle(&mut state);
        state.run.clone()
    }

    /// Most recent completed figures, kept while a newer run is pending.
    pub fn last_result(&self) -> Option<SpeedTestResult> {
        let mut state = self.lock();
        Self::settle(&mut state);
        state.last_result.clone()
    }

    pub fn status(&self) -> SpeedTestStatus {
        let mut state = self.lock();
        Self::settle(&mut state);
        SpeedTestStatus {
            run: state.run.clone(),
            last_result: state.last_result.clone(),
        }
    }

    fn settle(state: &mut OrchestratorState) {
        let Some(rx) = state.job.as_mut() else {
            return;
        };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => JobOutcome::Failed("speed-test task ended unexpectedly".into()),
        };
        state.job = None;
        state.task = None;

        match outcome {
            JobOutcome::Completed(result) => {
                info!(
                    down = result.download_mbps,
                    up = result.upload_mbps,
                    ping = result.ping_ms,
                    "speed test completed"
                );
                state.run.state = SpeedTestState::Completed;
                state.run.result = Some(result.clone());
                state.last_result = Some(result);
            }
            JobOutcome::Failed(reason) => {
                warn!(%reason, "speed test failed");
                state.run.state = SpeedTestState::Failed;
                state.run.error = Some(reason);
            }
        }
    }
}

// ── Job task ─────────────────────────────────────────────────────

struct Job {
    gateway: Gateway,
    network_id: String,
    poll_interval: Duration,
    deadline: Duration,
    started_at: DateTime<Utc>,
}

impl Job {
    async fn run(self) -> JobOutcome {
        let network_id = self.network_id.clone();
        let started = self
            .gateway
            .call("speedtest start", move |api, token| {
                let network_id = network_id.clone();
                async move { api.start_speedtest(&network_id, &token).await }
            })
            .await;
        if let Err(e) = started {
            return JobOutcome::Failed(format!("could not start speed test: {e}"));
        }

        match tokio::time::timeout(self.deadline, self.watch()).await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::Failed(format!(
                "speed test did not finish within {}s",
                self.deadline.as_secs()
            )),
        }
    }

    async fn watch(&self) -> JobOutcome {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        // Without a date, a terminal record only counts once this run has
        // been seen in progress.
        let mut seen_running = false;

        loop {
            interval.tick().await;

            let network_id = self.network_id.clone();
            let status = self
                .gateway
                .call("speedtest status", move |api, token| {
                    let network_id = network_id.clone();
                    async move { api.speedtest_status(&network_id, &token).await }
                })
                .await;

            let raw = match status {
                Ok(raw) => raw,
                Err(e) if e.needs_user() => return JobOutcome::Failed(e.to_string()),
                Err(e) => {
                    debug!(error = %e, "speed-test status check failed; will retry");
                    continue;
                }
            };

            let progress = raw.progress();
            let terminal = progress != SpeedTestProgress::Running;
            if is_stale(raw.date.as_deref(), self.started_at, seen_running, terminal) {
                debug!("upstream still reports the previous run");
                continue;
            }

            match progress {
                SpeedTestProgress::Running => seen_running = true,
                SpeedTestProgress::Completed {
                    down_mbps,
                    up_mbps,
                    ping_ms,
                } => {
                    return JobOutcome::Completed(SpeedTestResult {
                        download_mbps: down_mbps,
                        upload_mbps: up_mbps,
                        ping_ms,
                        completed_at: Utc::now(),
                    });
                }
                SpeedTestProgress::Failed { reason } => return JobOutcome::Failed(reason),
            }
        }
    }
}

/// `true` when the upstream record belongs to an earlier run: it is dated
/// before our start request, or it is undated and already terminal before
/// this run was ever reported in progress.
fn is_stale(
    date: Option<&str>,
    started_at: DateTime<Utc>,
    seen_running: bool,
    terminal: bool,
) -> bool {
    match date.and_then(|d| DateTime::parse_from_rfc3339(d).ok()) {
        Some(d) => d.with_timezone(&Utc) < started_at,
        None => terminal && !seen_running,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dated_records_compare_against_start() {
        let start: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        assert!(is_stale(Some("2026-03-01T11:59:00Z"), start, true, true));
        assert!(!is_stale(Some("2026-03-01T12:00:05Z"), start, false, true));
    }

    #[test]
    fn undated_terminal_record_needs_prior_progress() {
        let start: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        // Leftover result from the previous run.
        assert!(is_stale(None, start, false, true));
        assert!(is_stale(Some("yesterday"), start, false, true));
        // Finished after we saw it running.
        assert!(!is_stale(None, start, true, true));
        // Progress records are never stale on their own.
        assert!(!is_stale(None, start, false, false));
    }

    #[test]
    fn abandon_returns_to_idle_and_keeps_last_result() {
        let result = SpeedTestResult {
            download_mbps: 300.0,
            upload_mbps: 30.0,
            ping_ms: 12.0,
            completed_at: Utc::now(),
        };
        let (_tx, rx) = oneshot::channel::<JobOutcome>();
        let mut state = OrchestratorState {
            run: SpeedTestRun::running(Utc::now()),
            last_result: Some(result.clone()),
            job: Some(rx),
            task: None,
        };
        SpeedTestOrchestrator::abandon(&mut state);
        assert_eq!(state.run, SpeedTestRun::default());
        assert!(!state.run.is_running());
        assert!(state.job.is_none());
        assert_eq!(state.last_result, Some(result));
    }

    #[test]
    fn settle_records_completion_and_keeps_last_result() {
        let mut state = OrchestratorState {
            run: SpeedTestRun::running(Utc::now()),
            ..OrchestratorState::default()
        };
        let (tx, rx) = oneshot::channel();
        state.job = Some(rx);

        SpeedTestOrchestrator::settle(&mut state);
        assert_eq!(state.run.state, SpeedTestState::Running);

        let result = SpeedTestResult {
            download_mbps: 500.0,
            upload_mbps: 50.0,
            ping_ms: 9.0,
            completed_at: Utc::now(),
        };
        tx.send(JobOutcome::Completed(result.clone())).unwrap();
        SpeedTestOrchestrator::settle(&mut state);
        assert_eq!(state.run.state, SpeedTestState::Completed);
        assert_eq!(state.last_result, Some(result.clone()));
        assert!(state.job.is_none());

        // A later failed run keeps the previous figures.
        state.run = SpeedTestRun::running(Utc::now());
        let (tx, rx) = oneshot::channel();
        state.job = Some(rx);
        tx.send(JobOutcome::Failed("boom".into())).unwrap();
        SpeedTestOrchestrator::settle(&mut state);
        assert_eq!(state.run.state, SpeedTestState::Failed);
        assert_eq!(state.run.error.as_deref(), Some("boom"));
        assert_eq!(state.last_result, Some(result));
    }

    #[test]
    fn dropped_job_counts_as_failure() {
        let mut state = OrchestratorState {
            run: SpeedTestRun::running(Utc::now()),
            ..OrchestratorState::default()
        };
        let (tx, rx) = oneshot::channel::<JobOutcome>();
        state.job = Some(rx);
        drop(tx);
        SpeedTestOrchestrator::settle(&mut state);
        assert_eq!(state.run.state, SpeedTestState::Failed);
    }
}

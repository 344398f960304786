// ── Speed-test run types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a speed-test run: `Idle → Running → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedTestState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Measured throughput of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub completed_at: DateTime<Utc>,
}

/// The current (or most recent) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestRun {
    pub state: SpeedTestState,
    pub started_at: Option<DateTime<Utc>>,
    pub result: Option<SpeedTestResult>,
    pub error: Option<String>,
}

impl SpeedTestRun {
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            state: SpeedTestState::Running,
            started_at: Some(started_at),
            result: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SpeedTestState::Running
    }
}

/// What status queries report: the run plus the last known good figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestStatus {
    pub run: SpeedTestRun,
    pub last_result: Option<SpeedTestResult>,
}

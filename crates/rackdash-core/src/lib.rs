//! Telemetry engine between `rackdash-api` and the HTTP layer.
//!
//! - **[`Engine`]**: facade owning the poll loop. [`Engine::start`] spawns a
//!   periodic task that fetches the device inventory, normalizes it, and
//!   hands a fresh [`Snapshot`] to the aggregator. Queries read atomically
//!   published state and never wait on a poll in progress.
//!
//! - **[`CredentialManager`]**: owns the upstream token: two-step
//!   verification, expiry, and single-flight silent refresh.
//!
//! - **[`Gateway`]**: attaches the live token to upstream calls and applies
//!   [`retry_policy`] (one refresh-and-retry on auth failure, skip otherwise).
//!
//! - **[`Aggregator`]**: current snapshot plus a time-bounded history.
//!
//! - **[`SpeedTestOrchestrator`]**: fire-and-poll speed-test state machine.
//!
//! - **Domain model** ([`model`]): canonical `Device`, `Snapshot`,
//!   `HistoryPoint`, and speed-test types.

pub mod aggregate;
pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod model;
pub mod normalize;
pub mod speedtest;
pub mod upstream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use aggregate::{Aggregator, DeviceSort, Ingested};
pub use config::{DEFAULT_API_BASE, EngineConfig};
pub use credential::{
    AuthState, AuthStatus, Credential, CredentialManager, CredentialRecord, CredentialStore,
    FileStore, MemoryStore,
};
pub use engine::{Engine, PollReport, PollStatus};
pub use error::CoreError;
pub use speedtest::SpeedTestOrchestrator;
pub use upstream::{Gateway, RetryDecision, retry_policy};

pub use model::{
    Band, ConnectionKind, Device, Distributions, HistoryPoint, MacAddress, OsCategory,
    SignalQuality, Snapshot, SpeedTestResult, SpeedTestRun, SpeedTestState, SpeedTestStatus,
};

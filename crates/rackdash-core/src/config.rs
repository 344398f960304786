// ── Runtime engine configuration ──
//
// Describes *what* to poll and *how often*. Never touches disk: the
// binary resolves a `rackdash_config::Config` into an `EngineConfig`
// and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Default upstream API root.
pub const DEFAULT_API_BASE: &str = "https://api-user.e2ro.com/2.2";

/// Configuration for one polling engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upstream API root, including the version segment.
    pub api_base: Url,
    /// Network identifier used in device and speed-test paths.
    pub network_id: String,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// HistoryPoints older than this (relative to the newest) are evicted.
    pub retention: Duration,
    /// Upper bound on every upstream call.
    pub request_timeout: Duration,
    /// Tokens older than this are reported as stale. Advisory only.
    pub token_max_age: Duration,
    /// Keep records the upstream flags `connected: false`.
    pub include_disconnected: bool,
    /// Delay between speed-test status checks.
    pub speedtest_poll_interval: Duration,
    /// A speed test still running after this long is failed.
    pub speedtest_deadline: Duration,
    /// Where `credential.json` lives. `None` keeps the credential in memory.
    pub credential_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Build a config with default timings for the given upstream and network.
    pub fn new(api_base: Url, network_id: impl Into<String>) -> Self {
        Self {
            api_base,
            network_id: network_id.into(),
            poll_interval: Duration::from_secs(60),
            retention: Duration::from_secs(2 * 60 * 60),
            request_timeout: Duration::from_secs(10),
            token_max_age: Duration::from_secs(24 * 60 * 60),
            include_disconnected: false,
            speedtest_poll_interval: Duration::from_secs(5),
            speedtest_deadline: Duration::from_secs(180),
            credential_path: None,
        }
    }
}

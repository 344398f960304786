// ── Domain model ──
//
// Canonical, immutable value types produced by the normalizer and held by
// the aggregator and orchestrator.

pub mod device;
pub mod mac;
pub mod snapshot;
pub mod speedtest;

pub use device::{Band, ConnectionKind, Device, OsCategory, SignalQuality, signal_percent};
pub use mac::{InvalidMac, MacAddress};
pub use snapshot::{Distributions, HistoryPoint, Snapshot};
pub use speedtest::{SpeedTestResult, SpeedTestRun, SpeedTestState, SpeedTestStatus};

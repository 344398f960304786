// Upstream API response types
//
// Every endpoint wraps its payload in `{ "meta": {...}, "data": ... }`.
// Fields use `#[serde(default)]` liberally because device records differ
// between firmware versions and device classes. Optional scalars go through
// the `lenient` deserializers so a mistyped field drops only that field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Response Envelope ────────────────────────────────────────────────

/// Standard response envelope.
///
/// ```json
/// { "meta": { "code": 200 }, "data": { ... } }
/// ```
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: Meta,
    pub data: T,
}

/// Metadata from the envelope. `error` is set on application-level failures.
#[derive(Debug, Default, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

// ── Authentication ───────────────────────────────────────────────────

/// `data` payload of `POST /pro/login` and `POST /login/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenData {
    pub user_token: String,
}

/// `data` payload of `POST /login/verify`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyData {
    #[serde(default)]
    pub email: Option<VerifiedFlag>,
    #[serde(default)]
    pub phone: Option<VerifiedFlag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifiedFlag {
    #[serde(default)]
    pub verified: bool,
}

impl VerifyData {
    /// The account counts as verified if any contact channel reports it.
    pub fn is_verified(&self) -> bool {
        self.email.as_ref().is_some_and(|e| e.verified)
            || self.phone.as_ref().is_some_and(|p| p.verified)
    }
}

// ── Devices ──────────────────────────────────────────────────────────

/// `data` of `GET /networks/{id}/devices`: either a bare list or
/// an object holding a `devices` list, depending on API revision.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DeviceListData {
    List(Vec<Value>),
    Wrapped {
        #[serde(default)]
        devices: Vec<Value>,
    },
}

impl DeviceListData {
    pub fn into_records(self) -> Vec<Value> {
        match self {
            Self::List(records) | Self::Wrapped { devices: records } => records,
        }
    }
}

/// One device record as reported by the upstream.
///
/// Records are decoded individually from raw JSON so a single malformed
/// entry never fails the whole list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDevice {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub nickname: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub manufacturer: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_strings")]
    pub ips: Option<Vec<String>>,
    #[serde(default, deserialize_with = "crate::lenient::opt_bool")]
    pub connected: Option<bool>,
    #[serde(default, deserialize_with = "crate::lenient::opt_bool")]
    pub wireless: Option<bool>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub connection_type: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_object")]
    pub connectivity: Option<RawConnectivity>,
    #[serde(default, deserialize_with = "crate::lenient::opt_object")]
    pub interface: Option<RawInterface>,
    /// Catch-all for undocumented fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RawDevice {
    /// Decode a single record. Only a non-string `mac` fails the record;
    /// other mistyped fields decode as absent.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Radio link quality. Signal values arrive either as numbers or as
/// strings such as `"-48 dBm"`, so they stay loosely typed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConnectivity {
    #[serde(default)]
    pub signal: Option<Value>,
    #[serde(default)]
    pub signal_avg: Option<Value>,
    #[serde(default, deserialize_with = "crate::lenient::opt_i64")]
    pub score_bars: Option<i64>,
    #[serde(default)]
    pub frequency: Option<Value>,
}

/// Radio interface details (frequency in GHz or MHz, channel number).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInterface {
    #[serde(default)]
    pub frequency: Option<Value>,
    #[serde(default)]
    pub channel: Option<Value>,
}

// ── Speed test ───────────────────────────────────────────────────────

/// Latest speed-test run from `GET /networks/{id}/speedtest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSpeedTest {
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_f64")]
    pub down_mbps: Option<f64>,
    #[serde(default, deserialize_with = "crate::lenient::opt_f64")]
    pub up_mbps: Option<f64>,
    #[serde(default, deserialize_with = "crate::lenient::opt_f64")]
    pub ping_ms: Option<f64>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient::opt_string")]
    pub date: Option<String>,
}

/// Progress of an upstream speed-test run, derived from [`RawSpeedTest`].
#[derive(Debug, Clone, PartialEq)]
pub enum SpeedTestProgress {
    Running,
    Completed {
        down_mbps: f64,
        up_mbps: f64,
        ping_ms: f64,
    },
    Failed {
        reason: String,
    },
}

impl RawSpeedTest {
    pub fn progress(&self) -> SpeedTestProgress {
        match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("failed" | "error") => SpeedTestProgress::Failed {
                reason: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "speed test failed upstream".into()),
            },
            Some("completed" | "complete" | "done") | None => {
                match (self.down_mbps, self.up_mbps, self.ping_ms) {
                    (Some(down_mbps), Some(up_mbps), Some(ping_ms)) => {
                        SpeedTestProgress::Completed {
                            down_mbps,
                            up_mbps,
                            ping_ms,
                        }
                    }
                    _ if self.status.is_some() => SpeedTestProgress::Failed {
                        reason: "completed run is missing measurements".into(),
                    },
                    _ => SpeedTestProgress::Running,
                }
            }
            Some(_) => SpeedTestProgress::Running,
        }
    }
}

// ── Device domain types ──

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use strum::{Display, EnumIter};

use super::mac::MacAddress;

/// Operating-system family inferred from vendor and hostname hints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum OsCategory {
    #[serde(rename = "iOS")]
    #[strum(serialize = "iOS")]
    Ios,
    Android,
    Windows,
    Other,
    Unknown,
}

/// Wi-Fi frequency band.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum Band {
    #[serde(rename = "2.4GHz")]
    #[strum(serialize = "2.4GHz")]
    Ghz2_4,
    #[serde(rename = "5GHz")]
    #[strum(serialize = "5GHz")]
    Ghz5,
    #[serde(rename = "6GHz")]
    #[strum(serialize = "6GHz")]
    Ghz6,
    Unknown,
}

/// Signal quality tier derived from dBm.
///
/// Tier floors (inclusive): Excellent −50, Very Good −60, Good −67,
/// Fair −75; anything weaker is Poor. A reading exactly on a floor belongs
/// to the stronger tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum SignalQuality {
    Excellent,
    #[serde(rename = "Very Good")]
    #[strum(serialize = "Very Good")]
    VeryGood,
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    pub const EXCELLENT_FLOOR: f64 = -50.0;
    pub const VERY_GOOD_FLOOR: f64 = -60.0;
    pub const GOOD_FLOOR: f64 = -67.0;
    pub const FAIR_FLOOR: f64 = -75.0;

    /// Total mapping: every input (including NaN) lands in exactly one tier.
    pub fn from_dbm(dbm: f64) -> Self {
        if dbm >= Self::EXCELLENT_FLOOR {
            Self::Excellent
        } else if dbm >= Self::VERY_GOOD_FLOOR {
            Self::VeryGood
        } else if dbm >= Self::GOOD_FLOOR {
            Self::Good
        } else if dbm >= Self::FAIR_FLOOR {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// How the device reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionKind {
    Wired,
    Wireless,
    Unknown,
}

/// The canonical Device type.
///
/// Built fresh from upstream data on every poll and never mutated
/// afterwards; the next snapshot supersedes it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub mac: MacAddress,
    pub name: String,
    pub ip: Option<IpAddr>,
    pub manufacturer: Option<String>,
    pub os: OsCategory,
    pub band: Band,
    pub connection: ConnectionKind,
    /// `None` for wired devices and radios that report nothing usable.
    pub signal_dbm: Option<f64>,
    /// 0–100 rendering of `signal_dbm` for bar widgets.
    pub signal_percent: Option<u8>,
    pub quality: Option<SignalQuality>,
}

impl Device {
    pub fn is_wireless(&self) -> bool {
        self.connection == ConnectionKind::Wireless
    }
}

/// Linear 0–100 scale: −100 dBm and below is 0, −50 dBm and above is 100.
pub fn signal_percent(dbm: f64) -> u8 {
    if dbm.is_nan() {
        return 0;
    }
    let clamped = dbm.clamp(-100.0, -50.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pct = (2.0 * (clamped + 100.0)) as u8;
    pct
}

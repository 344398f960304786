// ── Raw-record to domain conversion ──
//
// Bridges raw `rackdash_api` device records into canonical `Device` values.
// Every field has an explicit gap policy; only the MAC address is
// mandatory, because it is the identity key and no safe placeholder exists.

use std::net::IpAddr;

use serde_json::Value;
use tracing::debug;

use rackdash_api::models::RawDevice;

use crate::model::{
    Band, ConnectionKind, Device, MacAddress, OsCategory, SignalQuality, signal_percent,
};

/// Why a record was left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dropped {
    MissingMac,
    InvalidMac(String),
    Undecodable(String),
}

/// Result of normalizing one upstream inventory.
#[derive(Debug, Default)]
pub struct Normalized {
    pub devices: Vec<Device>,
    pub dropped: Vec<Dropped>,
}

// ── Lookup tables ──────────────────────────────────────────────────

/// Keyword prefixes matched against hint tokens, checked in order.
const OS_KEYWORDS: &[(OsCategory, &[&str])] = &[
    (
        OsCategory::Ios,
        &["apple", "iphone", "ipad", "ipod", "mac", "airpods", "watch", "ios"],
    ),
    (
        OsCategory::Android,
        &[
            "android", "samsung", "galaxy", "google", "pixel", "huawei", "xiaomi", "oppo", "lg",
            "motorola", "sony", "oneplus",
        ],
    ),
    (
        OsCategory::Windows,
        &[
            "windows", "microsoft", "dell", "hp", "lenovo", "asus", "acer", "surface", "desktop",
            "pc", "laptop",
        ],
    ),
];

/// Estimated dBm for devices that only report a 1–5 bar score.
fn dbm_from_bars(bars: i64) -> Option<f64> {
    match bars {
        5 => Some(-45.0),
        4 => Some(-55.0),
        3 => Some(-65.0),
        2 => Some(-75.0),
        1 => Some(-85.0),
        _ => None,
    }
}

// ── Entry points ───────────────────────────────────────────────────

/// Decode and normalize every record, dropping the ones without a usable MAC.
pub fn normalize_records(records: Vec<Value>) -> Normalized {
    let mut out = Normalized::default();
    for record in records {
        let result = RawDevice::from_value(record)
            .map_err(|e| Dropped::Undecodable(e.to_string()))
            .and_then(|raw| normalize(&raw));
        match result {
            Ok(device) => out.devices.push(device),
            Err(reason) => {
                debug!(?reason, "dropping device record");
                out.dropped.push(reason);
            }
        }
    }
    out
}

/// Normalize one raw record. Pure: the same input always yields the same output.
pub fn normalize(raw: &RawDevice) -> Result<Device, Dropped> {
    let mac_raw = non_empty(raw.mac.as_ref()).ok_or(Dropped::MissingMac)?;
    let mac = MacAddress::parse(mac_raw).map_err(|e| Dropped::InvalidMac(e.0))?;

    let mut connection = connection_kind(raw);

    let signal_dbm = if connection == ConnectionKind::Wired {
        None
    } else {
        signal_dbm(raw)
    };
    if signal_dbm.is_some() && connection == ConnectionKind::Unknown {
        connection = ConnectionKind::Wireless;
    }

    let band = if connection == ConnectionKind::Wired {
        Band::Unknown
    } else {
        band(raw)
    };

    Ok(Device {
        name: display_name(raw, &mac),
        ip: ip_address(raw),
        manufacturer: non_empty(raw.manufacturer.as_ref()).map(str::to_owned),
        os: os_category(raw),
        band,
        connection,
        signal_dbm,
        signal_percent: signal_dbm.map(signal_percent),
        quality: signal_dbm.map(SignalQuality::from_dbm),
        mac,
    })
}

// ── Field policies ─────────────────────────────────────────────────

fn non_empty(raw: Option<&String>) -> Option<&str> {
    raw.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Nickname, then hostname, then a placeholder from the MAC suffix.
fn display_name(raw: &RawDevice, mac: &MacAddress) -> String {
    non_empty(raw.nickname.as_ref())
        .or_else(|| non_empty(raw.hostname.as_ref()))
        .map_or_else(|| format!("Device-{}", mac.suffix()), str::to_owned)
}

fn ip_address(raw: &RawDevice) -> Option<IpAddr> {
    raw.ips
        .iter()
        .flatten()
        .chain(raw.ip.iter())
        .find_map(|s| s.trim().parse().ok())
}

fn connection_kind(raw: &RawDevice) -> ConnectionKind {
    match raw
        .connection_type
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("wired" | "ethernet") => ConnectionKind::Wired,
        Some("wireless" | "wifi") => ConnectionKind::Wireless,
        _ => match raw.wireless {
            Some(true) => ConnectionKind::Wireless,
            Some(false) => ConnectionKind::Wired,
            None => ConnectionKind::Unknown,
        },
    }
}

/// Parse a dBm reading from a number or a string like `"-48 dBm"`.
/// Readings outside [-120, 0] are treated as absent.
pub(crate) fn parse_dbm(value: &Value) -> Option<f64> {
    let dbm = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let numeric = trimmed
                .strip_suffix("dBm")
                .or_else(|| trimmed.strip_suffix("dbm"))
                .unwrap_or(trimmed);
            numeric.trim().parse::<f64>().ok()
        }
        _ => None,
    }?;
    (-120.0..=0.0).contains(&dbm).then_some(dbm)
}

fn signal_dbm(raw: &RawDevice) -> Option<f64> {
    let conn = raw.connectivity.as_ref()?;
    conn.signal_avg
        .as_ref()
        .and_then(parse_dbm)
        .or_else(|| conn.signal.as_ref().and_then(parse_dbm))
        .or_else(|| conn.score_bars.and_then(dbm_from_bars))
}

/// Parse a frequency in GHz. Values above 1000 are taken as MHz.
fn parse_frequency_ghz(value: &Value) -> Option<f64> {
    let freq = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            let numeric = lower
                .strip_suffix("ghz")
                .or_else(|| lower.strip_suffix("mhz"))
                .unwrap_or(&lower)
                .trim()
                .to_owned();
            numeric.parse::<f64>().ok()
        }
        _ => None,
    }?;
    if freq > 1000.0 {
        Some(freq / 1000.0)
    } else {
        Some(freq)
    }
}

fn band_from_ghz(ghz: f64) -> Band {
    if (2.4..2.5).contains(&ghz) {
        Band::Ghz2_4
    } else if (5.0..5.9).contains(&ghz) {
        Band::Ghz5
    } else if (5.9..7.2).contains(&ghz) {
        Band::Ghz6
    } else {
        Band::Unknown
    }
}

/// Channel numbers only disambiguate 2.4 and 5 GHz; 6 GHz reuses low numbers.
fn band_from_channel(channel: i64) -> Band {
    match channel {
        1..=14 => Band::Ghz2_4,
        32..=177 => Band::Ghz5,
        _ => Band::Unknown,
    }
}

fn band(raw: &RawDevice) -> Band {
    let frequency = raw
        .interface
        .as_ref()
        .and_then(|i| i.frequency.as_ref())
        .or_else(|| raw.connectivity.as_ref().and_then(|c| c.frequency.as_ref()))
        .and_then(parse_frequency_ghz);

    if let Some(ghz) = frequency {
        return band_from_ghz(ghz);
    }

    raw.interface
        .as_ref()
        .and_then(|i| i.channel.as_ref())
        .and_then(|c| match c {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .map_or(Band::Unknown, band_from_channel)
}

fn os_category(raw: &RawDevice) -> OsCategory {
    let hints: Vec<String> = [
        &raw.manufacturer,
        &raw.device_type,
        &raw.hostname,
        &raw.model_name,
        &raw.display_name,
    ]
    .into_iter()
    .filter_map(|h| non_empty(h.as_ref()))
    .map(str::to_ascii_lowercase)
    .collect();

    if hints.is_empty() {
        return OsCategory::Unknown;
    }

    let tokens: Vec<&str> = hints
        .iter()
        .flat_map(|h| h.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect();

    for (category, keywords) in OS_KEYWORDS {
        if tokens
            .iter()
            .any(|t| keywords.iter().any(|k| t.starts_with(k)))
        {
            return *category;
        }
    }

    match non_empty(raw.device_type.as_ref()).map(str::to_ascii_lowercase) {
        Some(t) if t.contains("phone") || t.contains("mobile") || t.contains("tablet") => {
            OsCategory::Android
        }
        Some(t) if t.contains("computer") || t.contains("laptop") => OsCategory::Windows,
        _ => OsCategory::Other,
    }
}

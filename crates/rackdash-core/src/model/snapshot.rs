// ── Snapshot, history, and distribution types ──

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::device::{Band, Device, OsCategory, SignalQuality};

/// Everything observed at one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub devices: Vec<Device>,
    /// Mean over devices that report a signal; `None` if none do.
    pub average_signal_dbm: Option<f64>,
}

impl Snapshot {
    /// Build a snapshot, keeping the first record for any repeated MAC.
    pub fn new(taken_at: DateTime<Utc>, devices: Vec<Device>) -> Self {
        let mut seen = HashSet::with_capacity(devices.len());
        let devices: Vec<Device> = devices
            .into_iter()
            .filter(|d| seen.insert(d.mac.clone()))
            .collect();
        let average_signal_dbm = average_signal(&devices);
        Self {
            taken_at,
            devices,
            average_signal_dbm,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn wireless_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_wireless()).count()
    }
}

fn average_signal(devices: &[Device]) -> Option<f64> {
    let readings: Vec<f64> = devices.iter().filter_map(|d| d.signal_dbm).collect();
    if readings.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = readings.len() as f64;
    Some(readings.iter().sum::<f64>() / count)
}

/// Compact time-series sample retained for trend charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub device_count: usize,
    pub wireless_count: usize,
    pub average_signal_dbm: Option<f64>,
}

impl From<&Snapshot> for HistoryPoint {
    fn from(s: &Snapshot) -> Self {
        Self {
            timestamp: s.taken_at,
            device_count: s.device_count(),
            wireless_count: s.wireless_count(),
            average_signal_dbm: s.average_signal_dbm.map(round2),
        }
    }
}

/// Aggregate breakdown of the current snapshot ("now", not history).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distributions {
    pub device_count: usize,
    pub os: BTreeMap<OsCategory, usize>,
    pub bands: BTreeMap<Band, usize>,
    pub quality: BTreeMap<SignalQuality, usize>,
    pub average_signal_dbm: Option<f64>,
    pub average_quality: Option<SignalQuality>,
}

impl From<&Snapshot> for Distributions {
    fn from(s: &Snapshot) -> Self {
        let mut os: BTreeMap<OsCategory, usize> = OsCategory::iter().map(|c| (c, 0)).collect();
        let mut bands: BTreeMap<Band, usize> = Band::iter().map(|b| (b, 0)).collect();
        let mut quality: BTreeMap<SignalQuality, usize> =
            SignalQuality::iter().map(|q| (q, 0)).collect();

        for device in &s.devices {
            *os.entry(device.os).or_default() += 1;
            *bands.entry(device.band).or_default() += 1;
            if let Some(q) = device.quality {
                *quality.entry(q).or_default() += 1;
            }
        }

        Self {
            device_count: s.device_count(),
            os,
            bands,
            quality,
            average_signal_dbm: s.average_signal_dbm.map(round2),
            average_quality: s.average_signal_dbm.map(SignalQuality::from_dbm),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

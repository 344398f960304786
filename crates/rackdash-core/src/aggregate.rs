// ── Rolling-window aggregator ──
//
// Owns the current snapshot and the retained history. The whole state is
// one immutable `AggregateState` behind an `ArcSwap`: `ingest` publishes a
// new value with `rcu`, readers load a single pointer and never observe a
// half-applied update.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Device, Distributions, HistoryPoint, Snapshot};

/// Ordering requested by a `current_devices` caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceSort {
    /// Upstream order, as received.
    #[default]
    Upstream,
    Name,
    /// Strongest signal first; devices without a reading last.
    Signal,
    Mac,
}

#[derive(Debug, Default)]
struct AggregateState {
    current: Option<Arc<Snapshot>>,
    /// Oldest first, strictly increasing timestamps.
    history: Vec<HistoryPoint>,
}

/// Result of offering a snapshot to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Accepted { evicted: usize },
    /// Not newer than the latest retained point; ignored.
    OutOfOrder,
}

pub struct Aggregator {
    retention: TimeDelta,
    state: ArcSwap<AggregateState>,
}

impl Aggregator {
    pub fn new(retention: Duration) -> Result<Self, CoreError> {
        if retention.is_zero() {
            return Err(CoreError::Config {
                message: "retention window must be greater than zero".into(),
            });
        }
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        Ok(Self {
            retention,
            state: ArcSwap::from_pointee(AggregateState::default()),
        })
    }

    /// Store `snapshot` as current, append its history point, and evict
    /// every point at or beyond the retention window of the newest one.
    pub fn ingest(&self, snapshot: Snapshot) -> Ingested {
        let taken_at = snapshot.taken_at;
        let point = HistoryPoint::from(&snapshot);
        let snapshot = Arc::new(snapshot);
        let mut outcome = Ingested::OutOfOrder;

        self.state.rcu(|cur| {
            if cur.history.last().is_some_and(|last| last.timestamp >= taken_at) {
                outcome = Ingested::OutOfOrder;
                return Arc::clone(cur);
            }

            let cutoff = taken_at - self.retention;
            let mut history: Vec<HistoryPoint> = cur
                .history
                .iter()
                .filter(|p| p.timestamp > cutoff)
                .cloned()
                .collect();
            let evicted = cur.history.len() - history.len();
            history.push(point.clone());

            outcome = Ingested::Accepted { evicted };
            Arc::new(AggregateState {
                current: Some(Arc::clone(&snapshot)),
                history,
            })
        });

        match outcome {
            Ingested::Accepted { evicted } => {
                debug!(devices = point.device_count, evicted, "snapshot ingested");
            }
            Ingested::OutOfOrder => {
                warn!(%taken_at, "snapshot not newer than latest history point; ignored");
            }
        }
        outcome
    }

    /// The current snapshot, if any poll has succeeded.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.state.load().current.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.load().current.as_ref().map(|s| s.taken_at)
    }

    /// Devices from the current snapshot, in the requested order.
    pub fn current_devices(&self, sort: DeviceSort) -> Vec<Device> {
        let Some(snapshot) = self.current() else {
            return Vec::new();
        };
        let mut devices = snapshot.devices.clone();
        match sort {
            DeviceSort::Upstream => {}
            DeviceSort::Name => devices.sort_by_cached_key(|d| d.name.to_lowercase()),
            DeviceSort::Mac => devices.sort_by(|a, b| a.mac.cmp(&b.mac)),
            DeviceSort::Signal => devices.sort_by(|a, b| by_signal_desc(a.signal_dbm, b.signal_dbm)),
        }
        devices
    }

    /// Retained history, oldest first.
    pub fn history(&self) -> Vec<HistoryPoint> {
        self.state.load().history.clone()
    }

    /// Breakdown of the current snapshot. Empty before the first poll.
    pub fn distributions(&self) -> Distributions {
        self.current()
            .map(|s| Distributions::from(s.as_ref()))
            .unwrap_or_default()
    }
}

fn by_signal_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

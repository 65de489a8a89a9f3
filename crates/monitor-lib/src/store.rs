//! Per-probe observation storage for one measurement
//!
//! Observations are keyed by timestamp so the backfill/live seam
//! de-duplicates itself: a later arrival for the same (probe, timestamp)
//! replaces the earlier one.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::models::{EntryObservation, ProbeId};

/// Default retention: 24 h analysis horizon plus 2 h live window
pub const DEFAULT_RETENTION_SECS: u64 = 26 * 60 * 60;

/// Time-ordered observations of a single probe
#[derive(Debug, Clone, Default)]
pub struct ProbeSeries {
    observations: BTreeMap<i64, EntryObservation>,
}

impl ProbeSeries {
    /// Insert an observation; returns true if one with the same timestamp was replaced
    pub fn insert(&mut self, observation: EntryObservation) -> bool {
        self.observations
            .insert(observation.timestamp, observation)
            .is_some()
    }

    /// Drop observations strictly older than `cutoff`; returns how many were removed
    pub fn evict_before(&mut self, cutoff: i64) -> usize {
        let kept = self.observations.split_off(&cutoff);
        let removed = self.observations.len();
        self.observations = kept;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryObservation> {
        self.observations.values()
    }

    /// Entry RTT values in time order, `None` for unknown
    pub fn rtt_values(&self) -> Vec<Option<f64>> {
        self.observations.values().map(|o| o.entry_rtt).collect()
    }

    pub fn latest_timestamp(&self) -> Option<i64> {
        self.observations.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// All probe series of one measurement, bounded by a retention window
#[derive(Debug, Clone)]
pub struct SeriesStore {
    retention_secs: i64,
    probes: HashMap<ProbeId, ProbeSeries>,
    newest: Option<i64>,
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RETENTION_SECS))
    }
}

impl SeriesStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention_secs: retention.as_secs() as i64,
            probes: HashMap::new(),
            newest: None,
        }
    }

    /// Append an observation and evict the probe's entries older than the horizon
    ///
    /// The horizon trails the newest timestamp seen by the store, not the wall clock.
    pub fn insert(&mut self, observation: EntryObservation) -> bool {
        let ts = observation.timestamp;
        self.newest = Some(self.newest.map_or(ts, |n| n.max(ts)));
        let cutoff = self.cutoff();

        if ts < cutoff {
            return false;
        }

        let series = self.probes.entry(observation.probe_id).or_default();
        let replaced = series.insert(observation);
        series.evict_before(cutoff);
        replaced
    }

    /// Evict across all probes and forget probes left empty
    pub fn evict_expired(&mut self) -> usize {
        let cutoff = self.cutoff();
        let mut removed = 0;
        for series in self.probes.values_mut() {
            removed += series.evict_before(cutoff);
        }
        self.probes.retain(|_, s| !s.is_empty());
        removed
    }

    fn cutoff(&self) -> i64 {
        self.newest.map_or(i64::MIN, |n| n - self.retention_secs)
    }

    pub fn series(&self) -> impl Iterator<Item = (&ProbeId, &ProbeSeries)> {
        self.probes.iter()
    }

    pub fn probe(&self, probe_id: ProbeId) -> Option<&ProbeSeries> {
        self.probes.get(&probe_id)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    pub fn observation_count(&self) -> usize {
        self.probes.values().map(ProbeSeries::len).sum()
    }

    pub fn newest_timestamp(&self) -> Option<i64> {
        self.newest
    }
}

//! Per-AS aggregation of level-shift flags into scored alerts
//!
//! Flags are grouped by the neighbor AS they entered through and counted in
//! epoch-aligned buckets. A settled bucket (`lag` buckets back from the newest)
//! is scored as the share of the AS's probes flagged in it.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::models::{Alert, AsNumber, LevelShiftFlag, MeasurementId, ProbeId};

/// Default bucket width (20 minutes)
const DEFAULT_BUCKET_SECS: i64 = 20 * 60;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub bucket_secs: i64,
    /// Which bucket to score, counted back from the newest (1 = newest)
    pub lag: usize,
    /// Minimum distinct probes an AS needs before it can alert
    pub min_probes: usize,
    pub min_anomaly_score: f64,
    pub min_alert_score: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_secs: DEFAULT_BUCKET_SECS,
            lag: 3,
            min_probes: 5,
            min_anomaly_score: 5.0,
            min_alert_score: 30.0,
        }
    }
}

/// Flag counts for one AS in one bucket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ASWindowBucket {
    pub as_number: AsNumber,
    /// Bucket start in Unix seconds, a multiple of the bucket width
    pub start: i64,
    pub flagged: u32,
    pub probes: u32,
}

pub struct AlertAggregator {
    config: AggregationConfig,
}

impl AlertAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config: AggregationConfig {
                bucket_secs: config.bucket_secs.max(1),
                lag: config.lag.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Dense bucket sequence for one AS from its first to its last bucket
    pub fn buckets(&self, as_number: AsNumber, flags: &[&LevelShiftFlag]) -> Vec<ASWindowBucket> {
        let width = self.config.bucket_secs;
        let mut sparse: BTreeMap<i64, (u32, HashSet<ProbeId>)> = BTreeMap::new();

        for flag in flags {
            let start = flag.timestamp.div_euclid(width) * width;
            let entry = sparse.entry(start).or_default();
            entry.0 += flag.flagged as u32;
            entry.1.insert(flag.probe_id);
        }

        let (Some(&first), Some(&last)) = (sparse.keys().next(), sparse.keys().next_back()) else {
            return Vec::new();
        };

        (0..=(last - first) / width)
            .map(|i| {
                let start = first + i * width;
                let (flagged, probes) = sparse
                    .get(&start)
                    .map(|(f, p)| (*f, p.len() as u32))
                    .unwrap_or((0, 0));
                ASWindowBucket {
                    as_number,
                    start,
                    flagged,
                    probes,
                }
            })
            .collect()
    }

    /// Score every AS and return the alerts above the anomaly threshold
    pub fn aggregate(&self, measurement_id: MeasurementId, flags: &[LevelShiftFlag]) -> Vec<Alert> {
        let mut by_as: BTreeMap<AsNumber, Vec<&LevelShiftFlag>> = BTreeMap::new();
        for flag in flags {
            if let Some(asn) = flag.entry_as {
                by_as.entry(asn).or_default().push(flag);
            }
        }

        let mut alerts = Vec::new();
        for (as_number, group) in by_as {
            let distinct: HashSet<ProbeId> = group.iter().map(|f| f.probe_id).collect();
            if distinct.len() < self.config.min_probes {
                continue;
            }

            let buckets = self.buckets(as_number, &group);
            if buckets.len() < self.config.lag {
                continue;
            }
            let bucket = &buckets[buckets.len() - self.config.lag];

            let score = score(bucket.flagged, distinct.len());
            if score <= self.config.min_anomaly_score {
                continue;
            }

            let Some(bucket_start) = bucket_time(bucket.start) else {
                continue;
            };

            alerts.push(Alert {
                measurement_id,
                as_number,
                bucket_start,
                score,
                notify: score > self.config.min_alert_score,
                flagged_probes: bucket.flagged,
                distinct_probes: distinct.len() as u32,
                description: format!(
                    "Increase in RTT in neighboring AS{}: {} of {} probes affected",
                    as_number,
                    bucket.flagged,
                    distinct.len()
                ),
            });
        }

        alerts
    }
}

impl Default for AlertAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

/// Percentage of probes flagged, rounded to two decimals
pub fn score(flagged: u32, distinct_probes: usize) -> f64 {
    if distinct_probes == 0 {
        return 0.0;
    }
    let raw = flagged as f64 / distinct_probes as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

fn bucket_time(start: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(start, 0).single()
}

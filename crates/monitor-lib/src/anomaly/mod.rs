//! Anomaly detection for entry latency series
//!
//! This module provides:
//! - Level-shift detection on per-probe entry RTT series
//! - Per-AS aggregation of level shifts into scored alerts
//! - Alert delivery to a log or Alertmanager webhook sink

mod aggregator;
mod level_shift;
mod sink;

pub use aggregator::{score, ASWindowBucket, AggregationConfig, AlertAggregator};
pub use level_shift::{median, quantile_sorted, LevelShiftConfig, LevelShiftDetector};
pub use sink::{
    AlertDeduplicator, AlertSink, AlertmanagerAlert, LogSink, MemorySink, WebhookSink,
};

//! Observability infrastructure for the edge monitor
//!
//! Provides:
//! - Prometheus metrics (stream traffic, detection latency, alert counts)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{Alert, MeasurementId};

/// Histogram buckets for detection pass latency (in seconds)
const DETECTION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    samples_received: IntCounter,
    samples_routed: IntCounter,
    samples_dropped: IntCounterVec,
    preprocess_failures: IntCounterVec,
    detection_latency_seconds: Histogram,
    detection_fit_failures: IntCounter,
    alerts_emitted: IntCounter,
    alerts_notified: IntCounter,
    sink_failures: IntCounter,
    subscription_errors: IntCounter,
    stream_reconnects: IntCounter,
    stream_connected: IntGauge,
    active_monitors: IntGauge,
    backfill_samples: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            samples_received: register_int_counter!(
                "edge_monitor_samples_received_total",
                "Samples received from the measurement stream"
            )
            .expect("Failed to register samples_received"),

            samples_routed: register_int_counter!(
                "edge_monitor_samples_routed_total",
                "Samples handed to a monitor worker"
            )
            .expect("Failed to register samples_routed"),

            samples_dropped: register_int_counter_vec!(
                "edge_monitor_samples_dropped_total",
                "Samples dropped before reaching a worker",
                &["reason"]
            )
            .expect("Failed to register samples_dropped"),

            preprocess_failures: register_int_counter_vec!(
                "edge_monitor_preprocess_failures_total",
                "Samples that could not be reduced to an entry observation",
                &["reason"]
            )
            .expect("Failed to register preprocess_failures"),

            detection_latency_seconds: register_histogram!(
                "edge_monitor_detection_latency_seconds",
                "Duration of one detection pass over a measurement",
                DETECTION_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            detection_fit_failures: register_int_counter!(
                "edge_monitor_detection_fit_failures_total",
                "Probe series skipped because the level-shift fit failed"
            )
            .expect("Failed to register detection_fit_failures"),

            alerts_emitted: register_int_counter!(
                "edge_monitor_alerts_emitted_total",
                "Alerts handed to the alert sink"
            )
            .expect("Failed to register alerts_emitted"),

            alerts_notified: register_int_counter!(
                "edge_monitor_alerts_notified_total",
                "Emitted alerts carrying the notify flag"
            )
            .expect("Failed to register alerts_notified"),

            sink_failures: register_int_counter!(
                "edge_monitor_sink_failures_total",
                "Alerts the sink failed to accept"
            )
            .expect("Failed to register sink_failures"),

            subscription_errors: register_int_counter!(
                "edge_monitor_subscription_errors_total",
                "Subscriptions rejected by the platform"
            )
            .expect("Failed to register subscription_errors"),

            stream_reconnects: register_int_counter!(
                "edge_monitor_stream_reconnects_total",
                "Reconnection attempts to the measurement stream"
            )
            .expect("Failed to register stream_reconnects"),

            stream_connected: register_int_gauge!(
                "edge_monitor_stream_connected",
                "1 when the measurement stream is connected"
            )
            .expect("Failed to register stream_connected"),

            active_monitors: register_int_gauge!(
                "edge_monitor_active_monitors",
                "Number of measurements with a registered worker"
            )
            .expect("Failed to register active_monitors"),

            backfill_samples: register_int_counter!(
                "edge_monitor_backfill_samples_total",
                "Historical samples loaded while seeding workers"
            )
            .expect("Failed to register backfill_samples"),
        }
    }
}

/// Lightweight handle to the process-wide monitor metrics
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_samples_received(&self) {
        self.inner().samples_received.inc();
    }

    pub fn inc_samples_routed(&self) {
        self.inner().samples_routed.inc();
    }

    /// Count a dropped sample; `reason` is a short label such as `no_route`
    pub fn inc_samples_dropped(&self, reason: &str) {
        self.inner().samples_dropped.with_label_values(&[reason]).inc();
    }

    pub fn samples_dropped(&self, reason: &str) -> u64 {
        self.inner().samples_dropped.with_label_values(&[reason]).get()
    }

    pub fn inc_preprocess_failures(&self, reason: &str) {
        self.inner().preprocess_failures.with_label_values(&[reason]).inc();
    }

    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_detection_fit_failures(&self) {
        self.inner().detection_fit_failures.inc();
    }

    /// Count an alert handed to the sink
    pub fn record_alert(&self, notify: bool) {
        self.inner().alerts_emitted.inc();
        if notify {
            self.inner().alerts_notified.inc();
        }
    }

    pub fn inc_sink_failures(&self) {
        self.inner().sink_failures.inc();
    }

    pub fn inc_subscription_errors(&self) {
        self.inner().subscription_errors.inc();
    }

    pub fn inc_stream_reconnects(&self) {
        self.inner().stream_reconnects.inc();
    }

    pub fn set_stream_connected(&self, connected: bool) {
        self.inner().stream_connected.set(connected as i64);
    }

    pub fn set_active_monitors(&self, count: i64) {
        self.inner().active_monitors.set(count);
    }

    pub fn add_backfill_samples(&self, count: u64) {
        self.inner().backfill_samples.inc_by(count);
    }
}

/// Structured logger for monitor events
///
/// Every event carries a stable `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, monitors: usize) {
        info!(
            event = "startup",
            instance = %self.instance,
            version = %version,
            monitors = monitors,
            "Edge monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown",
            instance = %self.instance,
            reason = %reason,
            "Edge monitor shutting down"
        );
    }

    pub fn log_monitor_started(&self, measurement_id: MeasurementId, kind: &str, restart: bool) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            measurement_id = measurement_id,
            kind = %kind,
            restart = restart,
            "Monitor worker started"
        );
    }

    pub fn log_monitor_stopped(&self, measurement_id: MeasurementId, reason: &str) {
        info!(
            event = "monitor_stopped",
            instance = %self.instance,
            measurement_id = measurement_id,
            reason = %reason,
            "Monitor worker stopped"
        );
    }

    pub fn log_alert(&self, alert: &Alert) {
        if alert.notify {
            warn!(
                event = "alert_emitted",
                instance = %self.instance,
                measurement_id = alert.measurement_id,
                asn = alert.as_number,
                bucket_start = %alert.bucket_start.to_rfc3339(),
                score = alert.score,
                notify = true,
                "{}",
                alert.description
            );
        } else {
            info!(
                event = "alert_emitted",
                instance = %self.instance,
                measurement_id = alert.measurement_id,
                asn = alert.as_number,
                bucket_start = %alert.bucket_start.to_rfc3339(),
                score = alert.score,
                notify = false,
                "{}",
                alert.description
            );
        }
    }

    pub fn log_stream_status(&self, state: &str, subscriptions: usize) {
        match state {
            "connected" => info!(
                event = "stream_status",
                instance = %self.instance,
                state = %state,
                subscriptions = subscriptions,
                "Measurement stream connected"
            ),
            _ => warn!(
                event = "stream_status",
                instance = %self.instance,
                state = %state,
                subscriptions = subscriptions,
                "Measurement stream not connected"
            ),
        }
    }
}

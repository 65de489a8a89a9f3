//! Alert delivery
//!
//! Handles:
//! - Handing scored alerts to the configured sink (log or Alertmanager webhook)
//! - Suppressing re-emission of an (AS, bucket) alert on later detection passes

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::PersistenceError;
use crate::models::{Alert, AsNumber};
use crate::observability::StructuredLogger;

/// Outbound collaborator that receives alerts; best effort, never retried
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn accept(&self, alert: &Alert) -> Result<(), PersistenceError>;

    fn name(&self) -> &'static str;
}

/// Writes alerts to the structured log
pub struct LogSink {
    logger: StructuredLogger,
}

impl LogSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl AlertSink for LogSink {
    async fn accept(&self, alert: &Alert) -> Result<(), PersistenceError> {
        self.logger.log_alert(alert);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Keeps alerts in memory; used by tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn accept(&self, alert: &Alert) -> Result<(), PersistenceError> {
        self.alerts
            .lock()
            .map_err(|e| PersistenceError::Rejected(e.to_string()))?
            .push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// RFC3339
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

impl AlertmanagerAlert {
    pub fn from_alert(alert: &Alert, source: &str) -> Self {
        let severity = if alert.notify { "critical" } else { "warning" };

        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), "EdgeLatencyLevelShift".to_string());
        labels.insert("severity".to_string(), severity.to_string());
        labels.insert("asn".to_string(), alert.as_number.to_string());
        labels.insert("measurement_id".to_string(), alert.measurement_id.to_string());
        labels.insert("source".to_string(), source.to_string());

        let mut annotations = HashMap::new();
        annotations.insert(
            "summary".to_string(),
            format!("RTT level shift via neighboring AS{}", alert.as_number),
        );
        annotations.insert("description".to_string(), alert.description.clone());
        annotations.insert("score".to_string(), format!("{:.2}", alert.score));
        annotations.insert(
            "flagged_probes".to_string(),
            format!("{}/{}", alert.flagged_probes, alert.distinct_probes),
        );

        Self {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: alert.bucket_start.to_rfc3339(),
            generator_url: Some(format!(
                "https://atlas.ripe.net/measurements/{}",
                alert.measurement_id
            )),
        }
    }
}

/// Posts alerts to an Alertmanager-compatible `/api/v2/alerts` endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    source: String,
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        source: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            source: source.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn accept(&self, alert: &Alert) -> Result<(), PersistenceError> {
        let payload = vec![AlertmanagerAlert::from_alert(alert, &self.source)];

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PersistenceError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Key for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupKey {
    as_number: AsNumber,
    bucket_start: i64,
}

/// What was last emitted for a key
#[derive(Debug, Clone, Copy)]
struct Emitted {
    bucket_start: DateTime<Utc>,
    score: f64,
    notify: bool,
}

/// Remembers emitted (AS, bucket) alerts so settled buckets alert once
///
/// A bucket is re-emitted only when late samples escalate it: a higher score,
/// or crossing into `notify`.
pub struct AlertDeduplicator {
    horizon: ChronoDuration,
    emitted: HashMap<DedupKey, Emitted>,
}

impl AlertDeduplicator {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon: ChronoDuration::from_std(horizon).unwrap_or_else(|_| ChronoDuration::days(1)),
            emitted: HashMap::new(),
        }
    }

    /// Returns true if `alert` is new or escalates the last emission for its key, recording it
    pub fn should_emit(&mut self, alert: &Alert) -> bool {
        let key = DedupKey {
            as_number: alert.as_number,
            bucket_start: alert.bucket_start.timestamp(),
        };

        if let Some(previous) = self.emitted.get(&key) {
            let escalated = (alert.notify && !previous.notify) || alert.score > previous.score;
            if !escalated {
                return false;
            }
        }

        self.emitted.insert(
            key,
            Emitted {
                bucket_start: alert.bucket_start,
                score: alert.score,
                notify: alert.notify,
            },
        );
        true
    }

    /// Forget keys whose bucket fell behind the horizon
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.horizon;
        self.emitted.retain(|_, emitted| emitted.bucket_start >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }
}

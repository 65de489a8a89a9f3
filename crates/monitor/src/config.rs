//! Monitor configuration

use anyhow::{bail, Context, Result};
use monitor_lib::{
    anomaly::{AggregationConfig, LevelShiftConfig},
    monitor::{DispatcherConfig, WorkerConfig},
    platform::{DEFAULT_ATLAS_API_URL, DEFAULT_ATLAS_STREAM_URL},
    resolver::DEFAULT_RIPESTAT_URL,
    Measurement, MeasurementKind,
};
use serde::Deserialize;

/// Monitor configuration
///
/// Read from `EDGE_MONITOR_*` variables; nested sections use a double
/// underscore, e.g. `EDGE_MONITOR_WORKER__DETECTION_INTERVAL_SECS`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Instance name attached to logs and webhook alerts
    pub instance: String,

    /// Control API port for monitors, health and metrics
    pub api_port: u16,

    pub stream_url: String,
    pub api_base_url: String,
    pub asn_lookup_url: String,

    /// Alertmanager-compatible endpoint; alerts are only logged when unset
    pub alert_webhook_url: Option<String>,

    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub asn_cache_capacity: usize,

    /// Measurements monitored at startup: `5001,5004:traceroute`
    pub measurements: String,

    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub level_shift: LevelShiftConfig,
    pub aggregation: AggregationConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "edge-monitor".to_string())
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: 8080,
            stream_url: DEFAULT_ATLAS_STREAM_URL.to_string(),
            api_base_url: DEFAULT_ATLAS_API_URL.to_string(),
            asn_lookup_url: DEFAULT_RIPESTAT_URL.to_string(),
            alert_webhook_url: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            asn_cache_capacity: 100_000,
            measurements: String::new(),
            dispatcher: DispatcherConfig::default(),
            worker: WorkerConfig::default(),
            level_shift: LevelShiftConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("EDGE_MONITOR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl MonitorConfig {
    /// Load configuration from an optional `edge-monitor` file and the environment
    pub fn load() -> Result<Self> {
        Self::from_sources(environment())
    }

    fn from_sources(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("edge-monitor").required(false))
            .add_source(env)
            .build()
            .context("reading configuration sources")?;

        config
            .try_deserialize()
            .context("invalid monitor configuration")
    }

    /// Parse the startup measurement list; kind defaults to traceroute
    pub fn initial_measurements(&self) -> Result<Vec<Measurement>> {
        parse_measurements(&self.measurements)
    }
}

fn parse_measurements(list: &str) -> Result<Vec<Measurement>> {
    let mut measurements = Vec::new();

    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, kind) = match item.split_once(':') {
            Some((id, kind)) => (id, kind.parse::<MeasurementKind>().map_err(anyhow::Error::msg)?),
            None => (item, MeasurementKind::Traceroute),
        };

        let Ok(id) = id.trim().parse::<u64>() else {
            bail!("invalid measurement id in {:?}", item);
        };
        measurements.push(Measurement::new(id, kind));
    }

    Ok(measurements)
}

//! Core data models for the edge monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform-assigned measurement identifier
pub type MeasurementId = u64;

/// Identifier of a probe (vantage point) in the measurement network
pub type ProbeId = u64;

/// Autonomous system number
pub type AsNumber = u32;

/// Measurement type as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Traceroute,
    Ping,
    Dns,
    Http,
    Sslcert,
    Ntp,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Traceroute => "traceroute",
            MeasurementKind::Ping => "ping",
            MeasurementKind::Dns => "dns",
            MeasurementKind::Http => "http",
            MeasurementKind::Sslcert => "sslcert",
            MeasurementKind::Ntp => "ntp",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "traceroute" => Ok(MeasurementKind::Traceroute),
            "ping" => Ok(MeasurementKind::Ping),
            "dns" => Ok(MeasurementKind::Dns),
            "http" => Ok(MeasurementKind::Http),
            "sslcert" => Ok(MeasurementKind::Sslcert),
            "ntp" => Ok(MeasurementKind::Ntp),
            other => Err(format!("unknown measurement kind: {}", other)),
        }
    }
}

/// One subscription unit on the measurement platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub kind: MeasurementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Measurement {
    pub fn new(id: MeasurementId, kind: MeasurementKind) -> Self {
        Self {
            id,
            kind,
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} measurement {} ({})", self.kind, self.id, target),
            None => write!(f, "{} measurement {}", self.kind, self.id),
        }
    }
}

/// One traceroute result as pushed by the platform
///
/// Field names follow the RIPE Atlas result format; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(rename = "msm_id")]
    pub measurement_id: MeasurementId,
    #[serde(rename = "prb_id")]
    pub probe_id: ProbeId,
    /// Creation time in Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub dst_addr: Option<String>,
    #[serde(default, rename = "result")]
    pub hops: Vec<RawHop>,
}

/// Raw hop entry of a traceroute result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHop {
    #[serde(default)]
    pub hop: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, rename = "result")]
    pub replies: Vec<HopReply>,
}

/// A single reply packet (or timeout marker) for a hop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
}

/// Hop after cleaning: the fastest reply and the address that sent it
#[derive(Debug, Clone, PartialEq)]
pub struct HopRecord {
    pub hop: u32,
    pub ip: Option<String>,
    pub min_rtt: Option<f64>,
}

impl HopRecord {
    pub fn no_response(hop: u32) -> Self {
        Self {
            hop,
            ip: None,
            min_rtt: None,
        }
    }
}

/// Network-entry latency derived from one traceroute sample
///
/// `entry_rtt` is `None` when unknown and `f64::INFINITY` when the boundary hop
/// was the farthest responding hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryObservation {
    pub probe_id: ProbeId,
    pub timestamp: i64,
    pub entry_rtt: Option<f64>,
    pub entry_ip: Option<String>,
    pub entry_as: Option<AsNumber>,
}

impl EntryObservation {
    /// Observation where no network boundary could be located
    pub fn unknown(probe_id: ProbeId, timestamp: i64) -> Self {
        Self {
            probe_id,
            timestamp,
            entry_rtt: None,
            entry_ip: None,
            entry_as: None,
        }
    }

    /// Observation for a located boundary; the AS is dropped if the IP is unknown
    pub fn entry(
        probe_id: ProbeId,
        timestamp: i64,
        entry_rtt: Option<f64>,
        entry_ip: Option<String>,
        entry_as: Option<AsNumber>,
    ) -> Self {
        let entry_as = entry_ip.as_ref().and(entry_as);
        Self {
            probe_id,
            timestamp,
            entry_rtt,
            entry_ip,
            entry_as,
        }
    }

    pub fn is_known(&self) -> bool {
        self.entry_ip.is_some()
    }
}

/// Level-shift verdict for one observation; never persisted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelShiftFlag {
    pub probe_id: ProbeId,
    pub timestamp: i64,
    pub entry_as: Option<AsNumber>,
    pub flagged: bool,
}

/// Scored alert for a neighboring AS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub measurement_id: MeasurementId,
    pub as_number: AsNumber,
    pub bucket_start: DateTime<Utc>,
    /// Share of the AS's probes flagged in the bucket, in percent
    pub score: f64,
    pub notify: bool,
    pub flagged_probes: u32,
    pub distinct_probes: u32,
    pub description: String,
}

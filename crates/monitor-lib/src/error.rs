//! Error taxonomy for the monitoring pipeline
//!
//! Each kind maps to a fixed recovery policy: transport errors are retried,
//! subscription errors are reported, preprocessing errors drop one sample,
//! fit errors skip one probe, persistence errors drop one alert.

use crate::models::{MeasurementId, MeasurementKind, ProbeId};
use thiserror::Error;

/// Connection-level failures talking to the measurement platform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP request failed: {0}")]
    Http(String),
}

/// The platform or the monitor refused to watch a measurement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("No detection strategy for {kind} measurement {measurement_id}")]
    UnsupportedKind {
        measurement_id: MeasurementId,
        kind: MeasurementKind,
    },

    #[error("Platform rejected measurement {measurement_id}: {reason}")]
    Rejected {
        measurement_id: MeasurementId,
        reason: String,
    },
}

/// A single sample could not be turned into an observation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    #[error("Malformed sample from probe {probe_id}: {reason}")]
    Malformed { probe_id: ProbeId, reason: String },

    #[error("Could not resolve AS of destination {address}")]
    UnresolvedDestination { address: String },

    #[error("AS lookup for {address} failed: {reason}")]
    Lookup { address: String, reason: String },
}

impl PreprocessingError {
    /// Short metric label for the failure
    pub fn label(&self) -> &'static str {
        match self {
            PreprocessingError::Malformed { .. } => "malformed",
            PreprocessingError::UnresolvedDestination { .. } => "unresolved_destination",
            PreprocessingError::Lookup { .. } => "lookup_failed",
        }
    }
}

/// The level-shift fit failed for one probe's series
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionFitError {
    #[error("Series too short: {valid} valid points, need {required}")]
    InsufficientData { valid: usize, required: usize },

    #[error("No finite window shifts to fit a threshold on")]
    Degenerate,
}

/// The alert sink refused or failed to accept an alert
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Alert sink rejected alert: {0}")]
    Rejected(String),

    #[error("Alert sink unreachable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(0)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Closed(err.to_string())
            }
            WsError::Io(e) => TransportError::Connect(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

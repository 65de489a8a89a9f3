//! Measurement platform adapters
//!
//! The monitor talks to the platform through two seams: a push stream that
//! delivers results per subscribed measurement, and a pull API for history.

mod atlas_rest;
mod atlas_stream;

pub use atlas_rest::{AtlasRestClient, DEFAULT_ATLAS_API_URL};
pub use atlas_stream::{parse_frame, subscribe_frame, unsubscribe_frame, AtlasStreamTransport, DEFAULT_ATLAS_STREAM_URL};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::models::{MeasurementId, RawSample};

/// Event read from the push stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One measurement result
    Sample(RawSample),
    /// The platform reported an error, possibly tied to one subscription
    Error {
        measurement_id: Option<MeasurementId>,
        message: String,
    },
    /// A result frame whose payload could not be decoded
    Malformed(String),
    /// Acknowledgements and other frames the monitor does not act on
    Control(String),
}

/// Opens connections to the push stream
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, TransportError>;
}

/// One live push-stream connection
#[async_trait]
pub trait StreamConnection: Send {
    async fn subscribe(&mut self, measurement_id: MeasurementId) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, measurement_id: MeasurementId) -> Result<(), TransportError>;

    /// Next event, or `None` once the connection is closed
    ///
    /// Must be cancel safe: it is raced against control commands.
    async fn next_event(&mut self) -> Option<Result<StreamEvent, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pull access to stored results
#[async_trait]
pub trait HistoryClient: Send + Sync {
    /// Results created in `[start, stop]` (Unix seconds)
    async fn fetch_results(
        &self,
        measurement_id: MeasurementId,
        start: i64,
        stop: i64,
    ) -> Result<Vec<RawSample>, TransportError>;
}

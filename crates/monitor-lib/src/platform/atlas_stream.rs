//! RIPE Atlas result stream over WebSocket
//!
//! Frames are JSON arrays `[type, payload]`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use super::{StreamConnection, StreamEvent, StreamTransport};
use crate::error::TransportError;
use crate::models::{MeasurementId, RawSample};

pub const DEFAULT_ATLAS_STREAM_URL: &str = "wss://atlas-stream.ripe.net/stream/";

pub fn subscribe_frame(measurement_id: MeasurementId) -> String {
    json!(["atlas_subscribe", {"streamType": "result", "msm": measurement_id}]).to_string()
}

pub fn unsubscribe_frame(measurement_id: MeasurementId) -> String {
    json!(["atlas_unsubscribe", {"streamType": "result", "msm": measurement_id}]).to_string()
}

/// Decode one text frame from the stream
pub fn parse_frame(text: &str) -> Result<StreamEvent, TransportError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|e| TransportError::Protocol(format!("invalid frame: {}", e)))?;

    let (kind, payload) = match frame.as_array().map(Vec::as_slice) {
        Some([Value::String(kind), payload, ..]) => (kind.as_str(), payload.clone()),
        Some([Value::String(kind)]) => (kind.as_str(), Value::Null),
        _ => return Err(TransportError::Protocol("frame is not [type, payload]".into())),
    };

    match kind {
        "atlas_result" => Ok(match serde_json::from_value::<RawSample>(payload) {
            Ok(sample) => StreamEvent::Sample(sample),
            Err(e) => StreamEvent::Malformed(e.to_string()),
        }),
        "atlas_error" => Ok(StreamEvent::Error {
            measurement_id: error_measurement(&payload),
            message: match &payload {
                Value::String(s) => s.clone(),
                Value::Object(obj) => obj
                    .get("message")
                    .or_else(|| obj.get("reason"))
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| payload.to_string()),
                other => other.to_string(),
            },
        }),
        other => Ok(StreamEvent::Control(other.to_string())),
    }
}

fn error_measurement(payload: &Value) -> Option<MeasurementId> {
    let obj = payload.as_object()?;
    ["msm", "msm_id", "measurement_id"]
        .iter()
        .find_map(|key| obj.get(*key))
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
}

/// Connects to the Atlas streaming endpoint
pub struct AtlasStreamTransport {
    url: String,
    connect_timeout: Duration,
}

impl AtlasStreamTransport {
    /// Rejects anything but a `ws://` or `wss://` URL
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::Connect(format!("invalid stream URL {}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::Connect(format!(
                "stream URL must use ws or wss, got {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            url: parsed.to_string(),
            connect_timeout,
        })
    }
}

#[async_trait]
impl StreamTransport for AtlasStreamTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, TransportError> {
        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout.as_millis() as u64))??;

        info!(url = %self.url, status = %response.status(), "Connected to measurement stream");
        Ok(Box::new(AtlasStreamConnection { ws }))
    }
}

struct AtlasStreamConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl AtlasStreamConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }
}

#[async_trait]
impl StreamConnection for AtlasStreamConnection {
    async fn subscribe(&mut self, measurement_id: MeasurementId) -> Result<(), TransportError> {
        debug!(measurement_id, "Subscribing to results");
        self.send_text(subscribe_frame(measurement_id)).await
    }

    async fn unsubscribe(&mut self, measurement_id: MeasurementId) -> Result<(), TransportError> {
        debug!(measurement_id, "Unsubscribing from results");
        self.send_text(unsubscribe_frame(measurement_id)).await
    }

    async fn next_event(&mut self) -> Option<Result<StreamEvent, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(parse_frame(&text)),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Stream closed by server");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

//! Stream dispatcher
//!
//! Owns the single connection to the push stream and routes each inbound
//! sample to the worker registered for its measurement id.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{SubscriptionError, TransportError};
use crate::health::{components, HealthRegistry};
use crate::models::{MeasurementId, RawSample};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::platform::{StreamConnection, StreamEvent, StreamTransport};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Fixed delay between reconnection attempts
    pub reconnect_backoff_ms: u64,
    /// Capacity of each worker's inbound channel
    pub channel_capacity: usize,
    /// Consecutive failed connections before the stream is reported unhealthy
    pub unhealthy_after_failures: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 1000,
            channel_capacity: 1024,
            unhealthy_after_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the platform reported an error since connecting
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(MeasurementId),
    Unsubscribe(MeasurementId),
}

struct Shared {
    routes: DashMap<MeasurementId, mpsc::Sender<RawSample>>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
    capacity: usize,
    metrics: MonitorMetrics,
}

/// Cloneable handle used by the manager and workers
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Register a route for `measurement_id` and subscribe to its results
    ///
    /// Replaces any previous route for the id; the old receiver sees its channel close.
    pub fn subscribe(&self, measurement_id: MeasurementId) -> mpsc::Receiver<RawSample> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        self.shared.routes.insert(measurement_id, tx);
        let _ = self.shared.commands.send(Command::Subscribe(measurement_id));
        rx
    }

    /// Drop the route and subscription for `measurement_id`; no-op if absent
    pub fn unsubscribe(&self, measurement_id: MeasurementId) {
        if self.shared.routes.remove(&measurement_id).is_some() {
            let _ = self.shared.commands.send(Command::Unsubscribe(measurement_id));
        }
    }

    /// Route one sample to its worker without blocking
    ///
    /// Samples with no route, or whose worker channel is full, are dropped and counted.
    pub fn on_sample(&self, sample: RawSample) {
        let metrics = &self.shared.metrics;
        metrics.inc_samples_received();

        let id = sample.measurement_id;
        let Some(route) = self.shared.routes.get(&id).map(|r| r.value().clone()) else {
            metrics.inc_samples_dropped("no_route");
            debug!(measurement_id = id, "No worker for sample");
            return;
        };

        match route.try_send(sample) {
            Ok(()) => metrics.inc_samples_routed(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.inc_samples_dropped("channel_full");
                debug!(measurement_id = id, "Worker channel full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics.inc_samples_dropped("closed");
                self.shared
                    .routes
                    .remove_if(&id, |_, tx| tx.same_channel(&route));
            }
        }
    }

    pub fn is_subscribed(&self, measurement_id: MeasurementId) -> bool {
        self.shared.routes.contains_key(&measurement_id)
    }

    pub fn subscribed_ids(&self) -> Vec<MeasurementId> {
        let mut ids: Vec<MeasurementId> = self.shared.routes.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.state.send_replace(state);
    }
}

enum SessionEnd {
    Shutdown,
    Disrupted(TransportError),
}

enum Step {
    Event(Option<Result<StreamEvent, TransportError>>),
    Command(Option<Command>),
    Shutdown,
}

/// Connection owner; run it once on its own task
pub struct Dispatcher {
    handle: DispatcherHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn StreamTransport>,
    config: DispatcherConfig,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        config: DispatcherConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> (Self, DispatcherHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let handle = DispatcherHandle {
            shared: Arc::new(Shared {
                routes: DashMap::new(),
                state: state_tx,
                commands: commands_tx,
                capacity: config.channel_capacity.max(1),
                metrics: MonitorMetrics::new(),
            }),
        };

        let dispatcher = Self {
            handle: handle.clone(),
            commands: commands_rx,
            transport,
            config,
            health,
            logger,
        };

        (dispatcher, handle)
    }

    /// Connect, route, and reconnect with a fixed backoff until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let backoff = Duration::from_millis(self.config.reconnect_backoff_ms);
        let metrics = self.handle.shared.metrics.clone();
        info!(backoff_ms = self.config.reconnect_backoff_ms, "Starting stream dispatcher");

        let mut failures = 0u32;
        loop {
            self.handle.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.transport.connect() => Some(result),
                _ = shutdown.recv() => None,
            };

            match connected {
                None => break,
                Some(Ok(conn)) => {
                    failures = 0;
                    match self.session(conn, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Disrupted(e) => {
                            warn!(error = %e, "Measurement stream disrupted");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to connect to measurement stream");
                }
            }

            self.handle.set_state(ConnectionState::Disconnected);
            metrics.set_stream_connected(false);
            metrics.inc_stream_reconnects();
            failures += 1;
            if failures >= self.config.unhealthy_after_failures.max(1) {
                self.health
                    .set_unhealthy(
                        components::STREAM,
                        format!("{} consecutive connection failures", failures),
                    )
                    .await;
            } else {
                self.health
                    .set_degraded(components::STREAM, "reconnecting to measurement stream")
                    .await;
            }
            self.logger
                .log_stream_status(ConnectionState::Disconnected.as_str(), self.handle.subscribed_ids().len());

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.handle.set_state(ConnectionState::Disconnected);
        metrics.set_stream_connected(false);
        info!("Stream dispatcher stopped");
    }

    async fn session(
        &mut self,
        mut conn: Box<dyn StreamConnection>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        // Every active subscription is issued exactly once per connection
        let mut live: HashSet<MeasurementId> = HashSet::new();
        for id in self.handle.subscribed_ids() {
            if let Err(e) = conn.subscribe(id).await {
                return SessionEnd::Disrupted(e);
            }
            live.insert(id);
        }

        self.handle.set_state(ConnectionState::Connected);
        self.handle.shared.metrics.set_stream_connected(true);
        self.health.set_healthy(components::STREAM).await;
        self.logger
            .log_stream_status(ConnectionState::Connected.as_str(), live.len());

        loop {
            let step = tokio::select! {
                event = conn.next_event() => Step::Event(event),
                command = self.commands.recv() => Step::Command(command),
                _ = shutdown.recv() => Step::Shutdown,
            };

            match step {
                Step::Event(None) => {
                    return SessionEnd::Disrupted(TransportError::Closed("stream ended".into()))
                }
                Step::Event(Some(Err(e))) => return SessionEnd::Disrupted(e),
                Step::Event(Some(Ok(event))) => self.handle_event(event, &mut live).await,
                Step::Command(Some(Command::Subscribe(id))) => {
                    if self.handle.is_subscribed(id) && live.insert(id) {
                        if let Err(e) = conn.subscribe(id).await {
                            return SessionEnd::Disrupted(e);
                        }
                    }
                }
                Step::Command(Some(Command::Unsubscribe(id))) => {
                    if !self.handle.is_subscribed(id) && live.remove(&id) {
                        if let Err(e) = conn.unsubscribe(id).await {
                            return SessionEnd::Disrupted(e);
                        }
                    }
                }
                Step::Command(None) | Step::Shutdown => {
                    if let Err(e) = conn.close().await {
                        debug!(error = %e, "Error closing measurement stream");
                    }
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn handle_event(&self, event: StreamEvent, live: &mut HashSet<MeasurementId>) {
        let metrics = &self.handle.shared.metrics;
        match event {
            StreamEvent::Sample(sample) => self.handle.on_sample(sample),
            StreamEvent::Malformed(reason) => {
                metrics.inc_samples_received();
                metrics.inc_samples_dropped("decode");
                debug!(reason = %reason, "Undecodable result frame");
            }
            StreamEvent::Error {
                measurement_id: Some(id),
                message,
            } => {
                let err = SubscriptionError::Rejected {
                    measurement_id: id,
                    reason: message,
                };
                warn!(measurement_id = id, error = %err, "Subscription rejected by platform");
                metrics.inc_subscription_errors();

                // Closing the route stops the worker
                self.handle.shared.routes.remove(&id);
                live.remove(&id);

                self.handle.set_state(ConnectionState::Degraded);
                self.health.set_degraded(components::STREAM, err.to_string()).await;
            }
            StreamEvent::Error {
                measurement_id: None,
                message,
            } => {
                warn!(message = %message, "Platform reported an error");
                self.handle.set_state(ConnectionState::Degraded);
                self.health.set_degraded(components::STREAM, message).await;
            }
            StreamEvent::Control(kind) => debug!(kind = %kind, "Stream control frame"),
        }
    }
}

//! Monitor worker
//!
//! One task per measurement. The worker seeds its store from history, folds
//! live samples into per-probe series and runs detection periodically or on
//! request. A supervisor restarts it after a panic, up to a fixed budget.

use chrono::{TimeZone, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::anomaly::{AlertDeduplicator, AlertSink};
use crate::health::{components, HealthRegistry};
use crate::models::{Alert, Measurement, RawSample};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::platform::HistoryClient;
use crate::store::{SeriesStore, DEFAULT_RETENTION_SECS};
use crate::strategy::DetectionStrategy;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub detection_interval_secs: u64,
    pub backfill_enabled: bool,
    /// How far back the startup backfill reaches
    pub backfill_window_secs: u64,
    /// Width of each historical pull; the window is fetched slice by slice
    pub backfill_slice_secs: u64,
    /// Retries per slice before the worker settles for what it has
    pub backfill_retries: u32,
    pub backfill_retry_delay_ms: u64,
    pub retention_secs: u64,
    /// Panics tolerated before the worker stays stopped
    pub restart_budget: u32,
    pub stop_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 20 * 60,
            backfill_enabled: true,
            backfill_window_secs: 24 * 60 * 60,
            backfill_slice_secs: 60 * 60,
            backfill_retries: 3,
            backfill_retry_delay_ms: 1000,
            retention_secs: DEFAULT_RETENTION_SECS,
            restart_budget: 3,
            stop_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
}

/// Collaborators shared by all workers
#[derive(Clone)]
pub struct WorkerDeps {
    pub history: Option<Arc<dyn HistoryClient>>,
    pub sink: Arc<dyn AlertSink>,
    pub health: HealthRegistry,
    pub logger: StructuredLogger,
    pub config: WorkerConfig,
}

enum Control {
    Detect(oneshot::Sender<Vec<Alert>>),
}

/// Why a worker incarnation returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Stopped,
    Unsubscribed,
}

/// Channels that outlive a single worker incarnation
struct WorkerChannels {
    inbound: mpsc::Receiver<RawSample>,
    control: mpsc::Receiver<Control>,
    stop: watch::Receiver<bool>,
}

/// Sends detection requests to a running worker
#[derive(Clone)]
pub struct WorkerControl {
    control: mpsc::Sender<Control>,
}

impl WorkerControl {
    /// Run one detection pass now; `None` if the worker is gone
    ///
    /// A worker still backfilling answers at once with no alerts.
    pub async fn run_detection(&self) -> Option<Vec<Alert>> {
        let (tx, rx) = oneshot::channel();
        self.control.send(Control::Detect(tx)).await.ok()?;
        rx.await.ok()
    }
}

/// Manager-side handle to a supervised worker
pub struct WorkerHandle {
    measurement: Measurement,
    state: watch::Receiver<WorkerState>,
    control: WorkerControl,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    stop_timeout: Duration,
}

impl WorkerHandle {
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn control(&self) -> WorkerControl {
        self.control.clone()
    }

    /// Signal stop and wait for the supervisor to exit, aborting it after the timeout
    pub async fn stop(self) {
        self.stop.send_replace(true);

        let mut task = self.task;
        if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
            warn!(
                measurement_id = self.measurement.id,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Worker did not stop in time, aborting"
            );
            task.abort();
        }
    }
}

/// Start a supervised worker reading samples from `inbound`
pub fn spawn_worker(
    measurement: Measurement,
    strategy: Arc<dyn DetectionStrategy>,
    inbound: mpsc::Receiver<RawSample>,
    deps: WorkerDeps,
    restart: bool,
) -> WorkerHandle {
    let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
    let (control_tx, control_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_timeout = Duration::from_millis(deps.config.stop_timeout_ms);

    let channels = WorkerChannels {
        inbound,
        control: control_rx,
        stop: stop_rx,
    };

    deps.logger
        .log_monitor_started(measurement.id, measurement.kind.as_str(), restart);

    let task = tokio::spawn(supervise(
        measurement.clone(),
        strategy,
        deps,
        channels,
        state_tx,
    ));

    WorkerHandle {
        measurement,
        state: state_rx,
        control: WorkerControl {
            control: control_tx,
        },
        stop: stop_tx,
        task,
        stop_timeout,
    }
}

async fn supervise(
    measurement: Measurement,
    strategy: Arc<dyn DetectionStrategy>,
    deps: WorkerDeps,
    mut channels: WorkerChannels,
    state: watch::Sender<WorkerState>,
) {
    let budget = deps.config.restart_budget;
    let mut panics = 0u32;

    let reason = loop {
        let worker = MonitorWorker::new(measurement.clone(), strategy.clone(), deps.clone(), &state);

        match AssertUnwindSafe(worker.run(&mut channels)).catch_unwind().await {
            Ok(WorkerExit::Stopped) => break "stopped",
            Ok(WorkerExit::Unsubscribed) => break "subscription closed",
            Err(_) => {
                panics += 1;
                if panics > budget {
                    error!(
                        measurement_id = measurement.id,
                        panics, "Worker exceeded restart budget"
                    );
                    deps.health
                        .set_degraded(
                            components::MONITORS,
                            format!("worker for measurement {} stopped after {} panics", measurement.id, panics),
                        )
                        .await;
                    break "restart budget exhausted";
                }

                warn!(
                    measurement_id = measurement.id,
                    attempt = panics,
                    budget, "Worker panicked, restarting"
                );
                state.send_replace(WorkerState::Restarting);
                deps.logger
                    .log_monitor_started(measurement.id, measurement.kind.as_str(), true);
            }
        }
    };

    state.send_replace(WorkerState::Stopped);
    deps.logger.log_monitor_stopped(measurement.id, reason);
}

struct MonitorWorker<'a> {
    measurement: Measurement,
    strategy: Arc<dyn DetectionStrategy>,
    deps: WorkerDeps,
    state: &'a watch::Sender<WorkerState>,
    store: SeriesStore,
    dedup: AlertDeduplicator,
    metrics: MonitorMetrics,
}

enum Step {
    Sample(Option<RawSample>),
    Tick,
    Control(Option<Control>),
    Stop,
}

impl<'a> MonitorWorker<'a> {
    fn new(
        measurement: Measurement,
        strategy: Arc<dyn DetectionStrategy>,
        deps: WorkerDeps,
        state: &'a watch::Sender<WorkerState>,
    ) -> Self {
        let retention = Duration::from_secs(deps.config.retention_secs);
        Self {
            measurement,
            strategy,
            store: SeriesStore::new(retention),
            dedup: AlertDeduplicator::new(retention),
            deps,
            state,
            metrics: MonitorMetrics::new(),
        }
    }

    async fn run(mut self, channels: &mut WorkerChannels) -> WorkerExit {
        if *self.state.borrow() != WorkerState::Restarting {
            self.state.send_replace(WorkerState::Starting);
        }

        if !self.backfill(channels).await {
            return self.stopping();
        }

        self.state.send_replace(WorkerState::Running);
        info!(
            measurement_id = self.measurement.id,
            probes = self.store.probe_count(),
            observations = self.store.observation_count(),
            "Worker running"
        );

        let period = Duration::from_secs(self.deps.config.detection_interval_secs.max(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if stop_requested(&channels.stop) {
                return self.stopping();
            }

            let step = tokio::select! {
                sample = channels.inbound.recv() => Step::Sample(sample),
                _ = ticker.tick() => Step::Tick,
                control = channels.control.recv() => Step::Control(control),
                _ = channels.stop.changed() => Step::Stop,
            };

            match step {
                Step::Sample(Some(sample)) => self.ingest(sample).await,
                Step::Sample(None) => {
                    info!(measurement_id = self.measurement.id, "Inbound channel closed");
                    return WorkerExit::Unsubscribed;
                }
                Step::Tick => {
                    if self.detect_and_emit(&mut channels.stop).await.is_none() {
                        return self.stopping();
                    }
                }
                Step::Control(Some(Control::Detect(reply))) => {
                    match self.detect_and_emit(&mut channels.stop).await {
                        Some(alerts) => {
                            let _ = reply.send(alerts);
                        }
                        None => return self.stopping(),
                    }
                }
                // Control sender lives in the handle; closed means the handle is gone
                Step::Control(None) | Step::Stop => return self.stopping(),
            }
        }
    }

    fn stopping(&self) -> WorkerExit {
        self.state.send_replace(WorkerState::Stopping);
        WorkerExit::Stopped
    }

    /// Seed the store from history slice by slice; returns false if stopped meanwhile
    ///
    /// A failed slice is retried from its own start, so retries never refetch
    /// slices already ingested. Once a slice exhausts its retries the worker
    /// keeps the partial baseline.
    async fn backfill(&mut self, channels: &mut WorkerChannels) -> bool {
        let config = self.deps.config.clone();
        let Some(history) = self.deps.history.clone().filter(|_| config.backfill_enabled) else {
            return true;
        };

        let id = self.measurement.id;
        let until = Utc::now().timestamp();
        let since = until - config.backfill_window_secs as i64;
        let slice = config.backfill_slice_secs.max(1) as i64;
        let delay = Duration::from_millis(config.backfill_retry_delay_ms);

        let mut cursor = since;
        let mut failures = 0u32;
        let mut total = 0usize;

        while cursor <= until {
            let slice_end = (cursor + slice).min(until);
            let fetch = history.fetch_results(id, cursor, slice_end);

            let Some(result) = answer_empty_until(fetch, channels).await else {
                return false;
            };

            match result {
                Ok(samples) => {
                    let count = samples.len();
                    for sample in samples.into_iter().filter(|s| s.measurement_id == id) {
                        if stop_requested(&channels.stop) {
                            return false;
                        }
                        self.ingest(sample).await;
                    }
                    self.metrics.add_backfill_samples(count as u64);
                    total += count;
                    failures = 0;
                    cursor = slice_end + 1;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        measurement_id = id,
                        start = cursor,
                        stop = slice_end,
                        attempt = failures,
                        error = %e,
                        "Backfill slice failed"
                    );
                    if failures > config.backfill_retries {
                        error!(
                            measurement_id = id,
                            attempts = failures,
                            resume_from = cursor,
                            samples = total,
                            "Backfill retry budget exhausted, starting with a partial baseline"
                        );
                        return true;
                    }
                    if answer_empty_until(tokio::time::sleep(delay), channels).await.is_none() {
                        return false;
                    }
                }
            }
        }

        info!(
            measurement_id = id,
            samples = total,
            probes = self.store.probe_count(),
            "Backfill complete"
        );
        true
    }

    async fn ingest(&mut self, sample: RawSample) {
        match self.strategy.preprocess(&sample).await {
            Ok(observation) => {
                self.store.insert(observation);
            }
            Err(e) => {
                self.metrics.inc_preprocess_failures(e.label());
                debug!(
                    measurement_id = self.measurement.id,
                    probe_id = sample.probe_id,
                    error = %e,
                    "Dropping sample"
                );
            }
        }
    }

    /// One detection pass; `None` if stop was requested while it ran
    async fn detect_and_emit(&mut self, stop: &mut watch::Receiver<bool>) -> Option<Vec<Alert>> {
        let started = Instant::now();
        self.store.evict_expired();

        let store = std::mem::take(&mut self.store);
        let strategy = self.strategy.clone();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = strategy.detect(&store);
            (store, outcome)
        });

        let joined = tokio::select! {
            joined = task => joined,
            _ = wait_for_stop(stop) => return None,
        };

        let (store, outcome) = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!(measurement_id = self.measurement.id, error = %e, "Detection task cancelled");
                return Some(Vec::new());
            }
        };
        self.store = store;

        for _ in &outcome.fit_failures {
            self.metrics.inc_detection_fit_failures();
        }

        let scored = self.strategy.aggregate(self.measurement.id, &outcome.flags);
        if let Some(now) = self.store.newest_timestamp().and_then(|ts| Utc.timestamp_opt(ts, 0).single()) {
            self.dedup.evict(now);
        }

        let mut emitted = Vec::new();
        for alert in scored {
            if !self.dedup.should_emit(&alert) {
                continue;
            }
            match self.deps.sink.accept(&alert).await {
                Ok(()) => {
                    self.metrics.record_alert(alert.notify);
                    self.deps.health.set_healthy(components::ALERT_SINK).await;
                }
                Err(e) => {
                    self.metrics.inc_sink_failures();
                    warn!(
                        measurement_id = self.measurement.id,
                        asn = alert.as_number,
                        sink = self.deps.sink.name(),
                        error = %e,
                        "Alert sink failed"
                    );
                    self.deps
                        .health
                        .set_degraded(components::ALERT_SINK, e.to_string())
                        .await;
                }
            }
            emitted.push(alert);
        }

        let elapsed = started.elapsed();
        self.metrics.observe_detection_latency(elapsed.as_secs_f64());
        info!(
            measurement_id = self.measurement.id,
            probes_analyzed = outcome.probes_analyzed,
            fit_failures = outcome.fit_failures.len(),
            alerts = emitted.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Detection pass complete"
        );

        Some(emitted)
    }
}

/// Drive `fut` to completion while answering detection requests with an empty pass
///
/// `None` if stop was requested or the handle went away first.
async fn answer_empty_until<F: Future>(fut: F, channels: &mut WorkerChannels) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            _ = wait_for_stop(&mut channels.stop) => return None,
            control = channels.control.recv() => match control {
                Some(Control::Detect(reply)) => {
                    let _ = reply.send(Vec::new());
                }
                None => return None,
            },
        }
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Resolves once stop is requested or the stop sender is gone
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

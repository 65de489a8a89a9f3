//! Monitor manager
//!
//! The authoritative registry of monitored measurements. At most one worker
//! exists per measurement id; the registry entry API enforces it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::dispatcher::DispatcherHandle;
use super::worker::{spawn_worker, WorkerDeps, WorkerHandle, WorkerState};
use crate::error::SubscriptionError;
use crate::models::{Alert, Measurement, MeasurementId};
use crate::observability::MonitorMetrics;
use crate::strategy::StrategyRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyMonitored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub measurement: Measurement,
    pub state: WorkerState,
}

pub struct MonitorManager {
    registry: DashMap<MeasurementId, WorkerHandle>,
    dispatcher: DispatcherHandle,
    strategies: StrategyRegistry,
    deps: WorkerDeps,
    metrics: MonitorMetrics,
}

impl MonitorManager {
    pub fn new(dispatcher: DispatcherHandle, strategies: StrategyRegistry, deps: WorkerDeps) -> Self {
        Self {
            registry: DashMap::new(),
            dispatcher,
            strategies,
            deps,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Start monitoring `measurement`; a no-op if it is already monitored
    pub fn create_monitor(&self, measurement: Measurement) -> Result<CreateOutcome, SubscriptionError> {
        self.create(measurement, false)
    }

    /// Create every supported, not yet monitored measurement; returns the ids created
    pub fn create_monitors(&self, measurements: Vec<Measurement>) -> Vec<MeasurementId> {
        let mut created = Vec::new();
        for measurement in measurements {
            let id = measurement.id;
            match self.create_monitor(measurement) {
                Ok(CreateOutcome::Created) => created.push(id),
                Ok(CreateOutcome::AlreadyMonitored) => {}
                Err(e) => warn!(measurement_id = id, error = %e, "Skipping measurement"),
            }
        }
        created
    }

    fn create(&self, measurement: Measurement, restart: bool) -> Result<CreateOutcome, SubscriptionError> {
        let Some(strategy) = self.strategies.get(measurement.kind) else {
            return Err(SubscriptionError::UnsupportedKind {
                measurement_id: measurement.id,
                kind: measurement.kind,
            });
        };

        match self.registry.entry(measurement.id) {
            Entry::Occupied(_) => return Ok(CreateOutcome::AlreadyMonitored),
            Entry::Vacant(slot) => {
                let inbound = self.dispatcher.subscribe(measurement.id);
                let handle = spawn_worker(measurement, strategy, inbound, self.deps.clone(), restart);
                slot.insert(handle);
            }
        }

        self.metrics.set_active_monitors(self.registry.len() as i64);
        Ok(CreateOutcome::Created)
    }

    /// Stop and re-create the worker with a fresh store
    ///
    /// Unknown ids are logged and leave the registry untouched.
    pub async fn restart_monitor(&self, measurement_id: MeasurementId) -> bool {
        let Some(handle) = self.detach(measurement_id) else {
            warn!(measurement_id, "Restart requested for unknown measurement");
            return false;
        };

        let measurement = handle.measurement().clone();
        handle.stop().await;

        info!(measurement_id, "Restarting monitor");
        if let Err(e) = self.create(measurement, true) {
            warn!(measurement_id, error = %e, "Monitor could not be recreated");
        }
        true
    }

    /// Operator feedback on a monitor: re-seed it from scratch
    pub async fn feedback(&self, measurement_id: MeasurementId) -> bool {
        self.restart_monitor(measurement_id).await
    }

    /// Stop the worker and release its subscription; false if unknown
    pub async fn stop_monitor(&self, measurement_id: MeasurementId) -> bool {
        let Some(handle) = self.detach(measurement_id) else {
            return false;
        };

        handle.stop().await;
        self.metrics.set_active_monitors(self.registry.len() as i64);
        true
    }

    /// Remove the registry entry and its route together
    ///
    /// The entry guard is held across the unsubscribe so a concurrent create
    /// for the same id cannot register a route that this call then drops.
    fn detach(&self, measurement_id: MeasurementId) -> Option<WorkerHandle> {
        match self.registry.entry(measurement_id) {
            Entry::Occupied(entry) => {
                self.dispatcher.unsubscribe(measurement_id);
                Some(entry.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Run one detection pass now; `None` if the id is unknown or its worker is gone
    pub async fn run_detection(&self, measurement_id: MeasurementId) -> Option<Vec<Alert>> {
        // Clone the sender out so the registry shard is not held across the pass
        let control = self.registry.get(&measurement_id).map(|h| h.control())?;
        control.run_detection().await
    }

    pub fn contains(&self, measurement_id: MeasurementId) -> bool {
        self.registry.contains_key(&measurement_id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn list(&self) -> Vec<MonitorStatus> {
        let mut monitors: Vec<MonitorStatus> = self
            .registry
            .iter()
            .map(|entry| MonitorStatus {
                measurement: entry.measurement().clone(),
                state: entry.state(),
            })
            .collect();
        monitors.sort_by_key(|m| m.measurement.id);
        monitors
    }

    /// Stop every worker; used at process teardown
    pub async fn shutdown(&self) {
        let ids: Vec<MeasurementId> = self.registry.iter().map(|e| *e.key()).collect();
        let handles: Vec<WorkerHandle> = ids.into_iter().filter_map(|id| self.detach(id)).collect();

        info!(monitors = handles.len(), "Stopping all monitors");
        join_all(handles.into_iter().map(WorkerHandle::stop)).await;
        self.metrics.set_active_monitors(0);
    }
}

//! Measurement monitoring runtime
//!
//! This module provides:
//! - The stream dispatcher that owns the platform connection and routes samples
//! - Supervised per-measurement workers running preprocessing and detection
//! - The manager that creates, restarts and stops workers

mod dispatcher;
mod manager;
mod worker;


pub use dispatcher::{ConnectionState, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use manager::{CreateOutcome, MonitorManager, MonitorStatus};
pub use worker::{spawn_worker, WorkerConfig, WorkerControl, WorkerDeps, WorkerHandle, WorkerState};

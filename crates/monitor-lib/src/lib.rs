//! Edge latency monitor library
//!
//! This crate provides the core functionality for:
//! - Receiving traceroute results from the measurement platform stream
//! - Reducing each result to the latency of the destination network's entry hop
//! - Level-shift detection per probe and per-AS alert scoring
//! - Supervised per-measurement workers and their HTTP control surface
//! - Health checks and observability

pub mod anomaly;
pub mod api;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod platform;
pub mod preprocess;
pub mod resolver;
pub mod store;
pub mod strategy;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};

//! HTTP control surface: health, metrics and monitor management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::{Alert, Measurement, MeasurementId, MeasurementKind};
use crate::monitor::{ConnectionState, CreateOutcome, DispatcherHandle, MonitorManager, MonitorStatus};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub manager: Arc<MonitorManager>,
    pub dispatcher: DispatcherHandle,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, manager: Arc<MonitorManager>, dispatcher: DispatcherHandle) -> Self {
        Self {
            health_registry,
            manager,
            dispatcher,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitorRequest {
    pub measurement_id: MeasurementId,
    pub kind: MeasurementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl From<CreateMonitorRequest> for Measurement {
    fn from(req: CreateMonitorRequest) -> Self {
        Measurement {
            id: req.measurement_id,
            kind: req.kind,
            target: req.target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitorResponse {
    pub measurement_id: MeasurementId,
    pub outcome: CreateOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateRequest {
    pub measurements: Vec<CreateMonitorRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCreateResponse {
    pub created: Vec<MeasurementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorListResponse {
    pub stream: ConnectionState,
    pub monitors: Vec<MonitorStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub measurement_id: MeasurementId,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(measurement_id: MeasurementId) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("measurement {} is not monitored", measurement_id),
        }),
    )
        .into_response()
}

/// 200 unless a component is unhealthy; degraded is still operational
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_monitors(State(state): State<Arc<AppState>>) -> Json<MonitorListResponse> {
    Json(MonitorListResponse {
        stream: state.dispatcher.state(),
        monitors: state.manager.list(),
    })
}

async fn create_monitor(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMonitorRequest>,
) -> Response {
    let measurement_id = req.measurement_id;

    match state.manager.create_monitor(req.into()) {
        Ok(outcome) => {
            let status = match outcome {
                CreateOutcome::Created => StatusCode::CREATED,
                CreateOutcome::AlreadyMonitored => StatusCode::OK,
            };
            (
                status,
                Json(CreateMonitorResponse {
                    measurement_id,
                    outcome,
                }),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse { error: e.to_string() }),
        )
            .into_response(),
    }
}

async fn create_monitors(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkCreateRequest>,
) -> Json<BulkCreateResponse> {
    let measurements = req.measurements.into_iter().map(Measurement::from).collect();
    let created = state.manager.create_monitors(measurements);
    info!(created = created.len(), "Bulk monitor creation");
    Json(BulkCreateResponse { created })
}

async fn stop_monitor(State(state): State<Arc<AppState>>, Path(measurement_id): Path<MeasurementId>) -> Response {
    if state.manager.stop_monitor(measurement_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(measurement_id)
    }
}

async fn feedback(State(state): State<Arc<AppState>>, Path(measurement_id): Path<MeasurementId>) -> Response {
    if state.manager.feedback(measurement_id).await {
        StatusCode::ACCEPTED.into_response()
    } else {
        not_found(measurement_id)
    }
}

async fn detect(State(state): State<Arc<AppState>>, Path(measurement_id): Path<MeasurementId>) -> Response {
    match state.manager.run_detection(measurement_id).await {
        Some(alerts) => Json(DetectionResponse {
            measurement_id,
            alerts,
        })
        .into_response(),
        None => not_found(measurement_id),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/monitors", get(list_monitors).post(create_monitor))
        .route("/api/v1/monitors/bulk", post(create_monitors))
        .route("/api/v1/monitors/:id", delete(stop_monitor))
        .route("/api/v1/monitors/:id/feedback", post(feedback))
        .route("/api/v1/monitors/:id/detect", post(detect))
        .with_state(state)
}

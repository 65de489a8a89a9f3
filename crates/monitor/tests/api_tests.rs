//! Integration tests for the monitor API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use monitor_lib::{
    anomaly::{AggregationConfig, LevelShiftConfig, MemorySink},
    api::{create_router, AppState},
    error::TransportError,
    health::{components, HealthRegistry},
    monitor::{Dispatcher, DispatcherConfig, MonitorManager, WorkerConfig, WorkerDeps},
    observability::StructuredLogger,
    platform::{StreamConnection, StreamTransport},
    resolver::StaticResolver,
    strategy::StrategyRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Never connects; the API tests do not need a live stream
struct OfflineTransport;

#[async_trait]
impl StreamTransport for OfflineTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, TransportError> {
        Err(TransportError::Connect("offline".to_string()))
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::STREAM).await;
    health_registry.register(components::MONITORS).await;

    let logger = StructuredLogger::new("api-test");
    let (_dispatcher, dispatcher_handle) = Dispatcher::new(
        Arc::new(OfflineTransport),
        DispatcherConfig::default(),
        health_registry.clone(),
        logger.clone(),
    );

    let strategies = StrategyRegistry::with_defaults(
        Arc::new(StaticResolver::new()),
        LevelShiftConfig::default(),
        AggregationConfig::default(),
    );
    let deps = WorkerDeps {
        history: None,
        sink: Arc::new(MemorySink::new()),
        health: health_registry.clone(),
        logger,
        config: WorkerConfig::default(),
    };
    let manager = Arc::new(MonitorManager::new(dispatcher_handle.clone(), strategies, deps));

    let state = Arc::new(AppState::new(health_registry, manager, dispatcher_handle));
    let router = create_router(state.clone());

    (router, state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = call(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::STREAM, "reconnecting to measurement stream")
        .await;

    let (status, health) = call(&app, "GET", "/healthz", None).await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["stream"]["message"],
        "reconnecting to measurement stream"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::MONITORS, "all workers stopped")
        .await;

    let (status, health) = call(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_wiring() {
    let (app, state) = setup_test_app().await;

    let (status, readiness) = call(&app, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, readiness) = call(&app, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("edge_monitor_active_monitors"));
}

#[tokio::test]
async fn test_create_monitor_statuses() {
    let (app, _state) = setup_test_app().await;
    let body = json!({"measurement_id": 5001, "kind": "traceroute", "target": "k.root-servers.net"});

    let (status, created) = call(&app, "POST", "/api/v1/monitors", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["outcome"], "created");

    let (status, again) = call(&app, "POST", "/api/v1/monitors", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["outcome"], "already_monitored");

    let (status, error) = call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5002, "kind": "ping"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error["error"].as_str().unwrap().contains("5002"));
}

#[tokio::test]
async fn test_list_monitors() {
    let (app, _state) = setup_test_app().await;
    call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5001, "kind": "traceroute"})),
    )
    .await;

    let (status, list) = call(&app, "GET", "/api/v1/monitors", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["stream"], "disconnected");
    let monitors = list["monitors"].as_array().unwrap();
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0]["measurement"]["id"], 5001);
    assert_eq!(monitors[0]["measurement"]["kind"], "traceroute");
}

#[tokio::test]
async fn test_bulk_create() {
    let (app, _state) = setup_test_app().await;

    let (status, result) = call(
        &app,
        "POST",
        "/api/v1/monitors/bulk",
        Some(json!({"measurements": [
            {"measurement_id": 1, "kind": "traceroute"},
            {"measurement_id": 2, "kind": "dns"},
            {"measurement_id": 3, "kind": "traceroute"},
        ]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["created"], json!([1, 3]));
}

#[tokio::test]
async fn test_delete_monitor() {
    let (app, state) = setup_test_app().await;
    call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5001, "kind": "traceroute"})),
    )
    .await;

    let (status, _) = call(&app, "DELETE", "/api/v1/monitors/5001", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.manager.is_empty());

    let (status, _) = call(&app, "DELETE", "/api/v1/monitors/5001", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_feedback() {
    let (app, state) = setup_test_app().await;

    let (status, _) = call(&app, "POST", "/api/v1/monitors/5001/feedback", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5001, "kind": "traceroute"})),
    )
    .await;

    let (status, _) = call(&app, "POST", "/api/v1/monitors/5001/feedback", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(state.manager.contains(5001));
}

#[tokio::test]
async fn test_detect() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = call(&app, "POST", "/api/v1/monitors/5001/detect", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5001, "kind": "traceroute"})),
    )
    .await;

    let (status, result) = call(&app, "POST", "/api/v1/monitors/5001/detect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["measurement_id"], 5001);
    assert_eq!(result["alerts"], json!([]));
}

#[tokio::test]
async fn test_invalid_kind_rejected_by_extractor() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/monitors",
        Some(json!({"measurement_id": 5001, "kind": "carrier-pigeon"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

//! Edge monitor - network-entry latency anomaly detection
//!
//! Subscribes to RIPE Atlas traceroute results, tracks the latency of the
//! router through which each probe's traffic enters the destination network,
//! and raises alerts when many probes see it shift up at once.

use anyhow::{Context, Result};
use monitor_lib::{
    anomaly::{AlertSink, LogSink, WebhookSink},
    api::AppState,
    health::{components, HealthRegistry},
    monitor::{Dispatcher, MonitorManager, WorkerDeps},
    observability::StructuredLogger,
    platform::{AtlasRestClient, AtlasStreamTransport, HistoryClient},
    resolver::{AsResolver, CachedResolver, RipeStatResolver},
    strategy::StrategyRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting edge-monitor");

    let config = config::MonitorConfig::load()?;
    info!(
        instance = %config.instance,
        stream_url = %config.stream_url,
        api_port = config.api_port,
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STREAM).await;
    health_registry.register(components::MONITORS).await;
    health_registry.register(components::ALERT_SINK).await;

    let logger = StructuredLogger::new(&config.instance);
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

    let ripestat = RipeStatResolver::new(&config.asn_lookup_url, request_timeout)
        .context("building AS resolver")?;
    let resolver: Arc<dyn AsResolver> =
        Arc::new(CachedResolver::new(Arc::new(ripestat)).with_capacity(config.asn_cache_capacity));

    let history: Arc<dyn HistoryClient> = Arc::new(
        AtlasRestClient::new(&config.api_base_url, request_timeout)
            .context("building results API client")?,
    );

    let sink: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(
            WebhookSink::new(url, &config.instance, request_timeout).context("building alert webhook")?,
        ),
        None => Arc::new(LogSink::new(logger.clone())),
    };
    info!(sink = sink.name(), "Alert sink configured");

    let transport = AtlasStreamTransport::new(&config.stream_url, connect_timeout)
        .context("configuring measurement stream")?;
    let (dispatcher, dispatcher_handle) = Dispatcher::new(
        Arc::new(transport),
        config.dispatcher.clone(),
        health_registry.clone(),
        logger.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));

    let strategies =
        StrategyRegistry::with_defaults(resolver, config.level_shift.clone(), config.aggregation.clone());
    let deps = WorkerDeps {
        history: Some(history),
        sink,
        health: health_registry.clone(),
        logger: logger.clone(),
        config: config.worker.clone(),
    };
    let manager = Arc::new(MonitorManager::new(dispatcher_handle.clone(), strategies, deps));

    let created = manager.create_monitors(config.initial_measurements()?);
    logger.log_startup(MONITOR_VERSION, created.len());

    let app_state = Arc::new(AppState::new(
        health_registry.clone(),
        manager.clone(),
        dispatcher_handle,
    ));

    // Mark ready once the runtime is wired
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            let reason = match result {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("API server failed: {:#}", e),
                Err(e) => format!("API server task failed: {}", e),
            };
            error!(reason = %reason, "Control API stopped");
            logger.log_shutdown(&reason);
        }
    }

    info!("Shutting down");
    health_registry.set_ready(false).await;
    manager.shutdown().await;

    let _ = shutdown_tx.send(());
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "Dispatcher task failed");
    }
    api_handle.abort();

    Ok(())
}

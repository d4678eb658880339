//! Gridwatch Detector - anomaly detection for grid sensor readings
//!
//! Runs threshold and outlier-model detection over recent readings on a
//! fixed interval, publishing alerts to the log or a webhook.

use anyhow::{Context, Result};
use clap::Parser;
use detector_lib::{
    anomaly::{AlertSink, LogAlertSink, OutlierDetector, WebhookAlertSink},
    health::{components, HealthRegistry},
    observability::{DetectorMetrics, StructuredLogger},
    scheduler::{CycleOutcome, DetectionScheduler},
    store::{load_readings, MemoryStore, ReadingStore},
};
use gridwatch_detector::{
    api,
    config::{Cli, DetectorConfig},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = DetectorConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli);
    config.validate()?;
    info!(
        instance = %config.instance,
        mode = %config.mode,
        batch_size = config.batch_size,
        contamination = config.contamination,
        "Detector configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::ALERT_SINK).await;
    if config.mode.uses_model() {
        health_registry
            .set_degraded(components::MODEL, "Outlier model not trained")
            .await;
    }

    let metrics = DetectorMetrics::new();
    metrics.set_model_state(false, 0);

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(DETECTOR_VERSION, config.mode.as_str());

    let store = Arc::new(MemoryStore::default());
    if let Some(path) = &config.readings_file {
        let readings = load_readings(path)
            .await
            .with_context(|| format!("Failed to load readings from {}", path.display()))?;
        store.insert_batch(&readings).await?;
        info!(count = readings.len(), path = %path.display(), "Seeded reading store");
    }

    let sink: Arc<dyn AlertSink> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "Publishing alerts to webhook");
            Arc::new(WebhookAlertSink::new(url.clone())?)
        }
        None => Arc::new(LogAlertSink::new(logger.clone())),
    };

    let detection = config.detection_config();
    let mut scheduler = DetectionScheduler::new(detection.clone(), store, sink)
        .with_outlier(OutlierDetector::new(config.forest_config()))
        .with_threshold(config.threshold_config())
        .with_health(health_registry.clone())
        .with_logger(logger.clone());

    if config.once {
        let outcome = scheduler.run_once().await;
        match outcome {
            CycleOutcome::Completed(report) => info!(
                readings = report.readings,
                alerts = report.alerts,
                published = report.published,
                failed = report.failed,
                "Single detection cycle complete"
            ),
            other => warn!(outcome = other.as_str(), "Single detection cycle did not complete"),
        }
        logger.log_shutdown("single cycle complete");
        return Ok(());
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        &detection,
    ));

    // Mark detector as initialized; model-backed modes stay not-ready until trained
    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let detection_handle = tokio::spawn(async move {
        scheduler.run_continuous(shutdown_rx).await;
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // The scheduler finishes any in-flight cycle before observing shutdown
    let _ = shutdown_tx.send(());
    if let Err(e) = detection_handle.await {
        warn!(error = %e, "Detection task ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }
    info!("Shutting down");

    Ok(())
}

//! HTTP API for detector health, readiness and Prometheus metrics
//!
//! Component health comes from the registry; the detector adds two checks
//! of its own on top. Model-backed modes are not ready until the outlier
//! model is trained, and a missing or failed last cycle degrades health.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use detector_lib::{
    health::{components, ComponentStatus, CycleSummary, HealthRegistry, ReadinessResponse},
    observability::DetectorMetrics,
    scheduler::{DetectionConfig, DetectionMode},
};
use prometheus::{Encoder, TextEncoder};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Cycles older than this many intervals mean the scheduler has stalled
const STALE_CYCLE_INTERVALS: u32 = 3;

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: DetectorMetrics,
    pub mode: DetectionMode,
    /// Age after which the last cycle counts as stalled
    pub stale_after: Duration,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: DetectorMetrics,
        detection: &DetectionConfig,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            mode: detection.mode,
            stale_after: detection.interval * STALE_CYCLE_INTERVALS + detection.cycle_timeout,
        }
    }
}

/// Health implied by the most recent detection cycle
fn cycle_status(cycle: &CycleSummary, stale_after: Duration) -> ComponentStatus {
    let age = Utc::now().signed_duration_since(cycle.finished_at);
    let stale = age.to_std().map_or(false, |age| age > stale_after);
    if stale {
        return ComponentStatus::Unhealthy;
    }
    match cycle.outcome.as_str() {
        "completed" | "no_data" => ComponentStatus::Healthy,
        _ => ComponentStatus::Degraded,
    }
}

/// 200 while operational (healthy or degraded), 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut health = state.health_registry.health().await;
    if let Some(cycle) = &health.last_cycle {
        health.status = health.status.max(cycle_status(cycle, state.stale_after));
    }

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(health))
}

/// 200 once the detector can raise alerts in its configured mode
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut readiness = state.health_registry.readiness().await;

    if readiness.ready && state.mode.uses_model() {
        let model = state.health_registry.health().await.components.remove(components::MODEL);
        let trained = model.map_or(false, |m| m.status == ComponentStatus::Healthy);
        if !trained {
            readiness = ReadinessResponse {
                ready: false,
                reason: Some("Outlier model not trained".to_string()),
            };
        }
    }

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the shutdown signal fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Starting API server");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}

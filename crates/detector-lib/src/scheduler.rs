//! Detection cycle scheduling
//!
//! Drives fetch → ensure trained → score → publish, either once or in a
//! loop with a fixed sleep between cycles. Only one cycle runs at a time;
//! the scheduler owns the outlier detector, so training and scoring never
//! overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::anomaly::{
    AlertSink, OutlierDetector, ThresholdConfig, ThresholdDetector, TrainingOutcome,
};
use crate::health::{components, CycleSummary, HealthRegistry};
use crate::models::{AnomalyAlert, SensorReading};
use crate::observability::{DetectorMetrics, StructuredLogger};
use crate::store::ReadingStore;

/// Default number of recent readings analysed per cycle
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default training lookback window (24 hours)
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Default sleep between cycles
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound on a single cycle
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Training fetches this many batches worth of readings before filtering
const TRAINING_FETCH_MULTIPLIER: usize = 10;

/// Which detectors a deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Outlier model only
    #[default]
    Model,
    /// Threshold detector only
    Threshold,
    /// Both; the most severe alert per reading wins
    Combined,
}

impl DetectionMode {
    pub fn uses_model(&self) -> bool {
        matches!(self, DetectionMode::Model | DetectionMode::Combined)
    }

    pub fn uses_threshold(&self) -> bool {
        matches!(self, DetectionMode::Threshold | DetectionMode::Combined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Model => "model",
            DetectionMode::Threshold => "threshold",
            DetectionMode::Combined => "combined",
        }
    }
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "model" => Ok(DetectionMode::Model),
            "threshold" => Ok(DetectionMode::Threshold),
            "combined" => Ok(DetectionMode::Combined),
            other => Err(format!(
                "unknown detection mode '{}', expected model, threshold or combined",
                other
            )),
        }
    }
}

/// Configuration for the detection scheduler
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Recent readings fetched per cycle
    pub batch_size: usize,
    /// Age limit for outlier model training data
    pub lookback: Duration,
    /// Sleep between cycles in continuous mode
    pub interval: Duration,
    /// Cycles running longer than this are abandoned
    pub cycle_timeout: Duration,
    pub mode: DetectionMode,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lookback: DEFAULT_LOOKBACK,
            interval: DEFAULT_CYCLE_INTERVAL,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            mode: DetectionMode::default(),
        }
    }
}

/// Counts from a completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub readings: usize,
    pub alerts: usize,
    pub published: usize,
    pub failed: usize,
}

/// How a detection cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No recent readings to analyse
    NoData,
    /// The batch fetch failed; nothing was processed
    StoreUnavailable,
    /// The model needed training data and none was available
    Skipped,
    /// The cycle exceeded its timeout
    TimedOut,
    Completed(CycleReport),
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::NoData => "no_data",
            CycleOutcome::StoreUnavailable => "store_unavailable",
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::TimedOut => "timed_out",
            CycleOutcome::Completed(_) => "completed",
        }
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Detection scheduler owning both detectors
pub struct DetectionScheduler {
    config: DetectionConfig,
    store: Arc<dyn ReadingStore>,
    sink: Arc<dyn AlertSink>,
    threshold: ThresholdDetector,
    outlier: OutlierDetector,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl DetectionScheduler {
    pub fn new(
        config: DetectionConfig,
        store: Arc<dyn ReadingStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let threshold = ThresholdDetector::default().with_store(store.clone());
        Self {
            config,
            store,
            sink,
            threshold,
            outlier: OutlierDetector::default(),
            metrics: DetectorMetrics::new(),
            logger: StructuredLogger::new("gridwatch-detector"),
            health: None,
        }
    }

    pub fn with_outlier(mut self, outlier: OutlierDetector) -> Self {
        self.outlier = outlier;
        self
    }

    pub fn with_threshold(mut self, config: ThresholdConfig) -> Self {
        self.threshold = ThresholdDetector::new(config).with_store(self.store.clone());
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn outlier(&self) -> &OutlierDetector {
        &self.outlier
    }

    /// Mutable access for explicit retraining or reset
    pub fn outlier_mut(&mut self) -> &mut OutlierDetector {
        &mut self.outlier
    }

    /// Readings inside the lookback window, for model training
    pub async fn fetch_training_data(&self) -> anyhow::Result<Vec<SensorReading>> {
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff: DateTime<Utc> = Utc::now() - lookback;

        let limit = self.config.batch_size.saturating_mul(TRAINING_FETCH_MULTIPLIER);
        let readings = self.store.get_recent(None, limit).await?;
        Ok(readings
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect())
    }

    /// Fetch lookback data and train the outlier model on it
    pub async fn train_from_store(&mut self) -> anyhow::Result<TrainingOutcome> {
        let training = self.fetch_training_data().await?;
        self.train(&training)
    }

    /// Train (or retrain) the outlier model on the given readings
    pub fn train(&mut self, readings: &[SensorReading]) -> anyhow::Result<TrainingOutcome> {
        let start = Instant::now();
        let outcome = self.outlier.train(readings)?;
        self.metrics
            .observe_training_latency(start.elapsed().as_secs_f64());

        let (samples, trained) = match outcome {
            TrainingOutcome::Trained { samples } => (samples, true),
            TrainingOutcome::InsufficientData { samples } => (samples, false),
        };
        self.logger.log_training(samples, trained);
        self.metrics.set_model_state(
            self.outlier.is_trained(),
            self.outlier.model().map_or(0, |m| m.training_samples),
        );
        Ok(outcome)
    }

    /// Run one cycle under the configured timeout
    pub async fn run_once(&mut self) -> CycleOutcome {
        let timeout = self.config.cycle_timeout;
        match tokio::time::timeout(timeout, self.run_cycle()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Detection cycle timed out, abandoning"
                );
                self.record_cycle(CycleOutcome::TimedOut).await;
                CycleOutcome::TimedOut
            }
        }
    }

    /// Run a single detection cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let start = Instant::now();

        let recent = match self.store.get_recent(None, self.config.batch_size).await {
            Ok(readings) => {
                self.mark_healthy(components::STORE).await;
                readings
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch recent readings, aborting cycle");
                self.metrics.inc_store_errors();
                self.mark_degraded(components::STORE, e.to_string()).await;
                return self.finish(CycleOutcome::StoreUnavailable, start).await;
            }
        };

        if recent.is_empty() {
            info!("No recent data available for analysis");
            return self.finish(CycleOutcome::NoData, start).await;
        }

        if self.config.mode.uses_model() && !self.outlier.is_trained() {
            info!("Training outlier model on historical data");
            let training = match self.fetch_training_data().await {
                Ok(training) => training,
                Err(e) => {
                    warn!(error = %e, "Failed to fetch training data");
                    self.metrics.inc_store_errors();
                    Vec::new()
                }
            };
            if training.is_empty() {
                info!("No training data available, skipping detection cycle");
                self.mark_degraded(components::MODEL, "Outlier model not trained")
                    .await;
                return self.finish(CycleOutcome::Skipped, start).await;
            }
            if let Err(e) = self.train(&training) {
                warn!(error = %e, "Outlier model training failed");
            }
        }
        self.update_model_health().await;

        let alerts = self.detect(&recent).await;
        self.metrics.add_readings_processed(recent.len() as u64);

        let mut report = CycleReport {
            readings: recent.len(),
            alerts: alerts.len(),
            ..CycleReport::default()
        };

        for alert in &alerts {
            self.metrics.inc_alerts_detected(alert.severity);
            match self.sink.publish(alert).await {
                Ok(()) => {
                    debug!(
                        device_id = %alert.device_id,
                        metric = %alert.metric,
                        severity = %alert.severity,
                        "Alert published"
                    );
                    report.published += 1;
                    self.metrics.inc_alerts_published();
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.inc_publish_errors();
                    warn!(
                        device_id = %alert.device_id,
                        metric = %alert.metric,
                        error = %e,
                        "Failed to publish alert"
                    );
                }
            }
        }

        if report.failed > 0 {
            self.mark_degraded(
                components::ALERT_SINK,
                format!("{} alert(s) failed to publish", report.failed),
            )
            .await;
        } else if report.published > 0 {
            self.mark_healthy(components::ALERT_SINK).await;
        }

        self.logger.log_cycle(
            report.readings,
            report.alerts,
            report.published,
            start.elapsed().as_millis() as u64,
        );
        self.finish(CycleOutcome::Completed(report), start).await
    }

    /// Run the configured detectors over a batch
    pub async fn detect(&self, readings: &[SensorReading]) -> Vec<AnomalyAlert> {
        match self.config.mode {
            DetectionMode::Model => self.outlier.score(readings),
            DetectionMode::Threshold => self.evaluate_thresholds(readings).await,
            DetectionMode::Combined => {
                let mut alerts = self.evaluate_thresholds(readings).await;
                alerts.extend(self.outlier.score(readings));
                merge_most_severe(alerts)
            }
        }
    }

    /// Threshold evaluation needs arrival order; store batches are newest-first
    async fn evaluate_thresholds(&self, readings: &[SensorReading]) -> Vec<AnomalyAlert> {
        let mut chronological = readings.to_vec();
        // Reverse first so the stable sort keeps arrival order on equal timestamps
        chronological.reverse();
        chronological.sort_by_key(|r| r.timestamp);
        self.threshold.evaluate_batch(&chronological).await
    }

    /// Train once, then run cycles until shutdown
    ///
    /// Shutdown is observed between cycles, at the sleep point.
    pub async fn run_continuous(&mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            mode = %self.config.mode,
            "Starting continuous anomaly detection"
        );

        if self.config.mode.uses_model() {
            match self.train_from_store().await {
                Ok(TrainingOutcome::Trained { .. }) => {}
                Ok(TrainingOutcome::InsufficientData { samples }) => {
                    warn!(samples, "No usable training data yet, will retry next cycle");
                }
                Err(e) => {
                    warn!(error = %e, "Initial training failed, will retry next cycle");
                    self.metrics.inc_store_errors();
                }
            }
            self.update_model_health().await;
        }

        loop {
            let outcome = self.run_once().await;
            debug!(outcome = outcome.as_str(), "Cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down detection scheduler");
                    break;
                }
            }
        }
    }

    async fn finish(&self, outcome: CycleOutcome, start: Instant) -> CycleOutcome {
        self.metrics.observe_cycle_latency(start.elapsed().as_secs_f64());
        self.record_cycle(outcome).await;
        outcome
    }

    async fn record_cycle(&self, outcome: CycleOutcome) {
        if let Some(health) = &self.health {
            let report = outcome.report().copied().unwrap_or_default();
            health
                .record_cycle(CycleSummary {
                    finished_at: Utc::now(),
                    outcome: outcome.as_str().to_string(),
                    readings: report.readings,
                    alerts: report.alerts,
                })
                .await;
        }
    }

    async fn update_model_health(&self) {
        if !self.config.mode.uses_model() {
            return;
        }
        if self.outlier.is_trained() {
            self.mark_healthy(components::MODEL).await;
        } else {
            self.mark_degraded(components::MODEL, "Outlier model not trained")
                .await;
        }
    }

    async fn mark_healthy(&self, component: &str) {
        if let Some(health) = &self.health {
            health.set_healthy(component).await;
        }
    }

    async fn mark_degraded(&self, component: &str, message: impl Into<String>) {
        if let Some(health) = &self.health {
            health.set_degraded(component, message).await;
        }
    }
}

/// Keep the most severe alert per reading
///
/// Readings are identified by device and timestamp. Earlier alerts win
/// ties, and first-seen order is preserved.
pub fn merge_most_severe(alerts: Vec<AnomalyAlert>) -> Vec<AnomalyAlert> {
    let mut merged: Vec<AnomalyAlert> = Vec::with_capacity(alerts.len());
    let mut index: HashMap<(String, DateTime<Utc>), usize> = HashMap::new();

    for alert in alerts {
        let key = (alert.device_id.clone(), alert.timestamp);
        match index.get(&key) {
            Some(&pos) => {
                if alert.severity > merged[pos].severity {
                    merged[pos] = alert;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(alert);
            }
        }
    }
    merged
}

//! Observability infrastructure for the anomaly detector
//!
//! Provides:
//! - Prometheus metrics (cycle latency, training latency, alert counts, model state)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{AnomalyAlert, Severity};

/// Histogram buckets for cycle and training latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct DetectorMetricsInner {
    cycle_latency_seconds: Histogram,
    training_latency_seconds: Histogram,
    readings_processed: IntCounter,
    alerts_detected: IntCounterVec,
    alerts_published: IntCounter,
    publish_errors: IntCounter,
    store_errors: IntCounter,
    model_trained: IntGauge,
    training_samples: IntGauge,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "gridwatch_detection_cycle_seconds",
                "Time spent running a detection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_cycle_seconds"),

            training_latency_seconds: register_histogram!(
                "gridwatch_model_training_seconds",
                "Time spent fitting the outlier model",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register model_training_seconds"),

            readings_processed: register_int_counter!(
                "gridwatch_readings_processed_total",
                "Total number of sensor readings evaluated"
            )
            .expect("Failed to register readings_processed"),

            alerts_detected: register_int_counter_vec!(
                "gridwatch_alerts_detected_total",
                "Total number of anomaly alerts raised",
                &["severity"]
            )
            .expect("Failed to register alerts_detected"),

            alerts_published: register_int_counter!(
                "gridwatch_alerts_published_total",
                "Total number of alerts delivered to the alert channel"
            )
            .expect("Failed to register alerts_published"),

            publish_errors: register_int_counter!(
                "gridwatch_alert_publish_errors_total",
                "Total number of failed alert deliveries"
            )
            .expect("Failed to register publish_errors"),

            store_errors: register_int_counter!(
                "gridwatch_store_errors_total",
                "Total number of failed reading store queries"
            )
            .expect("Failed to register store_errors"),

            model_trained: register_int_gauge!(
                "gridwatch_model_trained",
                "Whether the outlier model is currently trained (1) or not (0)"
            )
            .expect("Failed to register model_trained"),

            training_samples: register_int_gauge!(
                "gridwatch_model_training_samples",
                "Number of readings the current outlier model was fit on"
            )
            .expect("Failed to register training_samples"),
        }
    }
}

/// Detector metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn observe_training_latency(&self, duration_secs: f64) {
        self.inner().training_latency_seconds.observe(duration_secs);
    }

    pub fn add_readings_processed(&self, count: u64) {
        self.inner().readings_processed.inc_by(count);
    }

    pub fn inc_alerts_detected(&self, severity: Severity) {
        self.inner()
            .alerts_detected
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn inc_alerts_published(&self) {
        self.inner().alerts_published.inc();
    }

    pub fn inc_publish_errors(&self) {
        self.inner().publish_errors.inc();
    }

    pub fn inc_store_errors(&self) {
        self.inner().store_errors.inc();
    }

    /// Record the current model state
    pub fn set_model_state(&self, trained: bool, training_samples: usize) {
        self.inner().model_trained.set(i64::from(trained));
        self.inner().training_samples.set(training_samples as i64);
    }
}

/// Structured logger for detector events
///
/// Provides consistent JSON-formatted logging for alerts, cycles, training
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, alert: &AnomalyAlert) {
        match alert.severity {
            Severity::High => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    device_id = %alert.device_id,
                    metric = %alert.metric,
                    value = alert.value,
                    severity = %alert.severity,
                    details = %alert.description,
                    "High severity anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    device_id = %alert.device_id,
                    metric = %alert.metric,
                    value = alert.value,
                    severity = %alert.severity,
                    details = %alert.description,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log the outcome of a detection cycle
    pub fn log_cycle(&self, readings: usize, alerts: usize, published: usize, elapsed_ms: u64) {
        info!(
            event = "detection_cycle",
            instance = %self.instance,
            readings = readings,
            alerts = alerts,
            published = published,
            elapsed_ms = elapsed_ms,
            "Detection cycle complete"
        );
    }

    /// Log a training attempt
    pub fn log_training(&self, samples: usize, trained: bool) {
        if trained {
            info!(
                event = "model_trained",
                instance = %self.instance,
                samples = samples,
                "Outlier model trained"
            );
        } else {
            warn!(
                event = "model_training_skipped",
                instance = %self.instance,
                samples = samples,
                "Outlier model training skipped, keeping previous state"
            );
        }
    }

    /// Log detector startup
    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "detector_started",
            instance = %self.instance,
            detector_version = %version,
            mode = %mode,
            "Anomaly detector started"
        );
    }

    /// Log detector shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "detector_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Anomaly detector shutting down"
        );
    }
}

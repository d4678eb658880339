//! Rule-based threshold detection
//!
//! Scores each metric of a reading against hard physical safety limits and,
//! failing those, against its z-score deviation from a rolling per-device
//! baseline. The most severe metric alert is returned for the reading.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::severity::{deviation_severity, most_severe, ALERT_SIGMA};
use super::window::{Baseline, HistoricalWindow, DEFAULT_WINDOW_CAPACITY};
use crate::models::{AnomalyAlert, Metric, SensorReading, Severity};
use crate::store::ReadingStore;

/// Lower voltage safety limit (V)
pub const VOLTAGE_MIN_SAFE: f64 = 200.0;
/// Upper voltage safety limit (V)
pub const VOLTAGE_MAX_SAFE: f64 = 250.0;
/// Upper temperature safety limit (°C)
pub const TEMPERATURE_MAX_SAFE: f64 = 70.0;
/// Temperature above which any statistical alert is high severity (°C)
pub const TEMPERATURE_HIGH_WATERMARK: f64 = 60.0;

/// Tunables for the threshold detector
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Per-device history kept as statistical context
    pub window_capacity: usize,
    /// Opens a low severity tier for deviations in `[low_sigma, 3.0)`
    pub low_sigma: Option<f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            low_sigma: None,
        }
    }
}

/// Stateless statistical threshold detector
pub struct ThresholdDetector {
    config: ThresholdConfig,
    store: Option<Arc<dyn ReadingStore>>,
}

impl ThresholdDetector {
    /// Detector without a history source; batches start from an empty window
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config, store: None }
    }

    /// Seed per-device history from the given store
    pub fn with_store(mut self, store: Arc<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Evaluate a single reading against optional history
    pub fn evaluate(
        &self,
        reading: &SensorReading,
        history: Option<&HistoricalWindow>,
    ) -> Option<AnomalyAlert> {
        let alerts: Vec<AnomalyAlert> = Metric::ALL
            .iter()
            .filter_map(|metric| self.check_metric(reading, *metric, history))
            .collect();
        most_severe(alerts)
    }

    fn check_metric(
        &self,
        reading: &SensorReading,
        metric: Metric,
        history: Option<&HistoricalWindow>,
    ) -> Option<AnomalyAlert> {
        let value = reading.value(metric);

        if let Some(description) = safety_violation(metric, value) {
            return Some(build_alert(reading, metric, Severity::High, description));
        }

        let baseline = match history {
            Some(window) => window.baseline(metric),
            None => Baseline::nominal(metric),
        };
        let deviation = baseline.deviation(value);

        let mut severity = deviation_severity(deviation, self.config.low_sigma)?;
        if metric == Metric::Temperature
            && severity < Severity::High
            && deviation >= ALERT_SIGMA
            && value > TEMPERATURE_HIGH_WATERMARK
        {
            severity = Severity::High;
        }

        let description = format!(
            "{} {}{} deviates {:.2}σ from mean {:.2}{}",
            capitalized(metric),
            value,
            metric.unit(),
            deviation,
            baseline.mean,
            metric.unit()
        );
        Some(build_alert(reading, metric, severity, description))
    }

    /// Evaluate a batch, threading per-device history through in arrival order
    ///
    /// Each reading sees every earlier reading of the same device in this
    /// batch as context. Store failures are logged and treated as no history.
    pub async fn evaluate_batch(&self, readings: &[SensorReading]) -> Vec<AnomalyAlert> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&SensorReading>> = HashMap::new();
        for reading in readings {
            let group = groups.entry(reading.device_id.as_str()).or_insert_with(|| {
                order.push(reading.device_id.as_str());
                Vec::new()
            });
            group.push(reading);
        }

        let mut alerts = Vec::new();
        for device_id in order {
            let group = &groups[device_id];
            let mut window = self.seed_window(device_id, group).await;
            for reading in group {
                if let Some(alert) = self.evaluate(reading, Some(&window)) {
                    alerts.push(alert);
                }
                window.push((*reading).clone());
            }
        }
        alerts
    }

    /// History strictly older than the device's earliest batch reading
    ///
    /// The store may already hold the batch itself; those readings are
    /// threaded through the window in order instead.
    async fn seed_window(&self, device_id: &str, batch: &[&SensorReading]) -> HistoricalWindow {
        let capacity = self.config.window_capacity;
        let Some(store) = &self.store else {
            return HistoricalWindow::new(capacity);
        };
        let Some(earliest) = batch.iter().map(|r| r.timestamp).min() else {
            return HistoricalWindow::new(capacity);
        };

        match store.get_recent(Some(device_id), capacity + batch.len()).await {
            Ok(history) => {
                let history: Vec<SensorReading> = history
                    .into_iter()
                    .filter(|r| r.timestamp < earliest)
                    .take(capacity)
                    .collect();
                debug!(device_id = %device_id, points = history.len(), "Seeded history");
                HistoricalWindow::from_newest_first(history, capacity)
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to fetch history, using nominal baseline");
                HistoricalWindow::new(capacity)
            }
        }
    }
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(ThresholdConfig::default())
    }
}

/// Expected range reported with threshold alerts
pub fn expected_range(metric: Metric) -> (f64, f64) {
    match metric {
        Metric::Voltage => (VOLTAGE_MIN_SAFE, VOLTAGE_MAX_SAFE),
        Metric::Current => (0.0, 10.0),
        Metric::Temperature => (0.0, TEMPERATURE_MAX_SAFE),
    }
}

fn safety_violation(metric: Metric, value: f64) -> Option<String> {
    match metric {
        Metric::Voltage if !(VOLTAGE_MIN_SAFE..=VOLTAGE_MAX_SAFE).contains(&value) => Some(format!(
            "Critical voltage {}V outside safe range [{}, {}]V",
            value, VOLTAGE_MIN_SAFE, VOLTAGE_MAX_SAFE
        )),
        Metric::Temperature if value > TEMPERATURE_MAX_SAFE => Some(format!(
            "Critical temperature {}°C exceeds safe limit {}°C",
            value, TEMPERATURE_MAX_SAFE
        )),
        _ => None,
    }
}

fn build_alert(
    reading: &SensorReading,
    metric: Metric,
    severity: Severity,
    description: String,
) -> AnomalyAlert {
    AnomalyAlert {
        device_id: reading.device_id.clone(),
        timestamp: reading.timestamp,
        metric,
        value: reading.value(metric),
        expected_range: expected_range(metric),
        severity,
        description,
    }
}

fn capitalized(metric: Metric) -> &'static str {
    match metric {
        Metric::Voltage => "Voltage",
        Metric::Current => "Current",
        Metric::Temperature => "Temperature",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{async_trait, MemoryStore};
    use chrono::{Duration, Utc};

    fn reading(voltage: f64, current: f64, temperature: f64) -> SensorReading {
        SensorReading::new("grid-1", Utc::now(), voltage, current, temperature)
    }

    fn history(points: &[(f64, f64, f64)]) -> HistoricalWindow {
        let start = Utc::now() - Duration::hours(1);
        HistoricalWindow::from_oldest_first(
            points
                .iter()
                .enumerate()
                .map(|(i, (v, c, t))| {
                    SensorReading::new("grid-1", start + Duration::seconds(i as i64), *v, *c, *t)
                })
                .collect(),
            DEFAULT_WINDOW_CAPACITY,
        )
    }

    struct FailingStore;

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn get_recent(
            &self,
            _device_id: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<SensorReading>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn insert_batch(&self, _readings: &[SensorReading]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_normal_reading_yields_nothing() {
        let detector = ThresholdDetector::default();
        assert!(detector.evaluate(&reading(231.0, 4.2, 36.0), None).is_none());
        assert!(detector.evaluate(&reading(244.0, 6.5, 48.0), None).is_none());
    }

    #[test]
    fn test_voltage_above_safe_range_always_high() {
        let detector = ThresholdDetector::default();
        // History centred on 260 would make it statistically normal
        let window = history(&[(259.0, 4.0, 35.0), (260.0, 4.0, 35.0), (261.0, 4.0, 35.0)]);

        for hist in [None, Some(&window)] {
            let alert = detector.evaluate(&reading(260.0, 4.0, 35.0), hist).unwrap();
            assert_eq!(alert.metric, Metric::Voltage);
            assert_eq!(alert.severity, Severity::High);
            assert_eq!(alert.expected_range, (200.0, 250.0));
            assert!(alert.description.contains("outside safe range"));
        }
    }

    #[test]
    fn test_voltage_below_safe_range() {
        let detector = ThresholdDetector::default();
        let alert = detector.evaluate(&reading(195.0, 4.0, 35.0), None).unwrap();
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_temperature_above_safe_limit() {
        let detector = ThresholdDetector::default();
        let alert = detector.evaluate(&reading(230.0, 4.0, 71.0), None).unwrap();
        assert_eq!(alert.metric, Metric::Temperature);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.expected_range, (0.0, 70.0));
        assert!(alert.description.contains("exceeds safe limit"));
    }

    #[test]
    fn test_current_deviation_tiers() {
        let detector = ThresholdDetector::default();

        // 3.5σ from nominal 4±1
        let alert = detector.evaluate(&reading(230.0, 7.5, 35.0), None).unwrap();
        assert_eq!(alert.metric, Metric::Current);
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.expected_range, (0.0, 10.0));

        // exactly 3.0σ is medium
        let alert = detector.evaluate(&reading(230.0, 7.0, 35.0), None).unwrap();
        assert_eq!(alert.severity, Severity::Medium);

        // 4.0σ is high
        let alert = detector.evaluate(&reading(230.0, 8.0, 35.0), None).unwrap();
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_hot_temperature_escalates_to_high() {
        let detector = ThresholdDetector::default();

        // 65°C is 6σ from nominal: high either way
        let alert = detector.evaluate(&reading(230.0, 4.0, 65.0), None).unwrap();
        assert_eq!(alert.severity, Severity::High);

        // Against a warm history 65°C is only 3σ, but above the 60°C watermark
        let window = history(&[(230.0, 4.0, 45.0), (230.0, 4.0, 50.0), (230.0, 4.0, 55.0)]);
        let baseline = window.baseline(Metric::Temperature);
        let deviation = baseline.deviation(65.0);
        assert!(deviation >= 3.0 && deviation < 4.0);
        let alert = detector.evaluate(&reading(230.0, 4.0, 65.0), Some(&window)).unwrap();
        assert_eq!(alert.metric, Metric::Temperature);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_medium_temperature_below_watermark() {
        let detector = ThresholdDetector::default();
        // 52.5°C is 3.5σ from 35±5
        let alert = detector.evaluate(&reading(230.0, 4.0, 52.5), None).unwrap();
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn test_equal_severity_tie_prefers_voltage() {
        let detector = ThresholdDetector::default();
        // voltage 247.5 and temperature 52.5 are both 3.5σ: medium
        let alert = detector.evaluate(&reading(247.5, 4.0, 52.5), None).unwrap();
        assert_eq!(alert.metric, Metric::Voltage);
        assert_eq!(alert.severity, Severity::Medium);

        // current and temperature both medium, voltage normal
        let alert = detector.evaluate(&reading(230.0, 7.5, 52.5), None).unwrap();
        assert_eq!(alert.metric, Metric::Current);
    }

    #[test]
    fn test_higher_severity_beats_order() {
        let detector = ThresholdDetector::default();
        // voltage medium, temperature over safe limit
        let alert = detector.evaluate(&reading(247.5, 4.0, 75.0), None).unwrap();
        assert_eq!(alert.metric, Metric::Temperature);
        assert_eq!(alert.severity, Severity::High);
    }

    #[test]
    fn test_low_tier_is_opt_in() {
        let detector = ThresholdDetector::new(ThresholdConfig {
            low_sigma: Some(2.0),
            ..ThresholdConfig::default()
        });
        // 2.5σ from nominal current
        let alert = detector.evaluate(&reading(230.0, 6.5, 35.0), None).unwrap();
        assert_eq!(alert.severity, Severity::Low);

        assert!(ThresholdDetector::default()
            .evaluate(&reading(230.0, 6.5, 35.0), None)
            .is_none());
    }

    #[test]
    fn test_flat_history_never_divides_by_zero() {
        let detector = ThresholdDetector::default();
        let window = history(&[(230.0, 4.0, 35.0); 5]);
        assert!(detector.evaluate(&reading(240.0, 9.0, 50.0), Some(&window)).is_none());
    }

    #[test]
    fn test_stable_history_then_spike() {
        let detector = ThresholdDetector::default();
        let mut points = Vec::new();
        for _ in 0..15 {
            points.extend([(229.0, 4.0, 35.0), (230.0, 4.0, 35.0), (231.0, 4.0, 35.0)]);
        }
        let window = history(&points);

        let alert = detector.evaluate(&reading(262.0, 4.0, 35.0), Some(&window)).unwrap();
        assert_eq!(alert.metric, Metric::Voltage);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.expected_range, (200.0, 250.0));
    }

    #[tokio::test]
    async fn test_batch_threads_context_within_device() {
        let detector = ThresholdDetector::default();
        let now = Utc::now();

        // R2 at 52°C is 3.4σ from nominal but close to R1 at 48°C
        let warm = vec![
            SensorReading::new("grid-1", now, 230.0, 4.0, 48.0),
            SensorReading::new("grid-1", now + Duration::seconds(10), 230.0, 4.0, 52.0),
        ];
        assert!(detector.evaluate_batch(&warm).await.is_empty());

        let cool = vec![
            SensorReading::new("grid-1", now, 230.0, 4.0, 35.0),
            SensorReading::new("grid-1", now + Duration::seconds(10), 230.0, 4.0, 52.0),
        ];
        let alerts = detector.evaluate_batch(&cool).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, Metric::Temperature);
        assert_eq!(alerts[0].value, 52.0);
    }

    #[tokio::test]
    async fn test_batch_devices_are_independent() {
        let detector = ThresholdDetector::default();
        let now = Utc::now();

        // A warm reading on another device must not become grid-1's context
        let readings = vec![
            SensorReading::new("grid-2", now, 230.0, 4.0, 48.0),
            SensorReading::new("grid-1", now + Duration::seconds(10), 230.0, 4.0, 52.0),
        ];
        let alerts = detector.evaluate_batch(&readings).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].device_id, "grid-1");
    }

    #[tokio::test]
    async fn test_batch_seeds_from_store() {
        let now = Utc::now();
        let stored: Vec<SensorReading> = (0..20)
            .map(|i| {
                SensorReading::new(
                    "grid-1",
                    now - Duration::minutes(30 - i),
                    230.0,
                    4.0,
                    50.0 + (i % 3) as f64,
                )
            })
            .collect();
        let store = Arc::new(MemoryStore::with_readings(stored));
        let detector = ThresholdDetector::default().with_store(store);

        // 52°C is normal against a ~51°C history
        let alerts = detector
            .evaluate_batch(&[SensorReading::new("grid-1", now, 230.0, 4.0, 52.0)])
            .await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_batch_already_in_store_is_not_its_own_history() {
        let now = Utc::now();
        let batch = vec![
            SensorReading::new("grid-1", now, 230.0, 4.0, 35.0),
            SensorReading::new("grid-1", now + Duration::seconds(10), 230.0, 4.1, 35.0),
            SensorReading::new("grid-1", now + Duration::seconds(20), 230.0, 7.5, 35.0),
        ];
        let store = Arc::new(MemoryStore::with_readings(batch.clone()));
        let detector = ThresholdDetector::default().with_store(store);

        let alerts = detector.evaluate_batch(&batch).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, Metric::Current);
        assert_eq!(alerts[0].value, 7.5);
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_batch_store_failure_falls_back_to_nominal() {
        let detector = ThresholdDetector::default().with_store(Arc::new(FailingStore));
        let now = Utc::now();

        let alerts = detector
            .evaluate_batch(&[
                SensorReading::new("grid-1", now, 231.0, 4.0, 35.0),
                SensorReading::new("grid-1", now + Duration::seconds(1), 260.0, 4.0, 35.0),
            ])
            .await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
    }
}

//! Multi-metric outlier model
//!
//! Lifecycle: `Untrained -> Trained`, re-entering `Untrained` only through
//! `reset`. Retraining replaces the fitted standardizer and forest together.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::features::{feature_matrix, Standardizer};
use super::forest::{ForestConfig, IsolationForest};
use super::severity::{attribute_metric, score_severity};
use crate::models::{AnomalyAlert, Metric, SensorReading};

/// Minimum readings required to fit the model
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Standardizer and forest fitted on the same training set
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub standardizer: Standardizer,
    pub forest: IsolationForest,
    pub training_samples: usize,
}

/// Result of a training attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    Trained { samples: usize },
    InsufficientData { samples: usize },
}

/// Per-reading model output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelVerdict {
    pub score: f64,
    pub is_outlier: bool,
}

/// Outlier model detector owning its fitted state
pub struct OutlierDetector {
    config: ForestConfig,
    model: Option<FittedModel>,
}

impl OutlierDetector {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    /// Convenience constructor overriding only the contamination
    pub fn with_contamination(contamination: f64) -> Self {
        Self::new(ForestConfig {
            contamination,
            ..ForestConfig::default()
        })
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&FittedModel> {
        self.model.as_ref()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Drop the fitted model
    pub fn reset(&mut self) {
        self.model = None;
    }

    /// Fit on training readings, replacing any previous model on success
    ///
    /// Fewer than `MIN_TRAINING_SAMPLES` readings leaves the detector as it
    /// was.
    pub fn train(&mut self, readings: &[SensorReading]) -> anyhow::Result<TrainingOutcome> {
        if readings.len() < MIN_TRAINING_SAMPLES {
            warn!(
                samples = readings.len(),
                required = MIN_TRAINING_SAMPLES,
                "Insufficient training data, skipping training"
            );
            return Ok(TrainingOutcome::InsufficientData {
                samples: readings.len(),
            });
        }

        let start = Instant::now();
        let raw = feature_matrix(readings);
        let standardizer = Standardizer::fit(&raw);
        let scaled = standardizer.transform(&raw);
        let forest = IsolationForest::fit(&scaled, &self.config)?;

        self.model = Some(FittedModel {
            standardizer,
            forest,
            training_samples: readings.len(),
        });

        info!(
            samples = readings.len(),
            contamination = self.config.contamination,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Outlier model trained"
        );
        Ok(TrainingOutcome::Trained {
            samples: readings.len(),
        })
    }

    /// Raw model verdicts; empty while untrained
    pub fn verdicts(&self, readings: &[SensorReading]) -> Vec<ModelVerdict> {
        let Some(model) = &self.model else {
            return Vec::new();
        };
        if readings.is_empty() {
            return Vec::new();
        }

        let scaled = model.standardizer.transform(&feature_matrix(readings));
        model
            .forest
            .score_samples(&scaled)
            .into_iter()
            .map(|score| ModelVerdict {
                score,
                is_outlier: model.forest.is_outlier(score),
            })
            .collect()
    }

    /// Alerts for readings the model labels as outliers
    pub fn score(&self, readings: &[SensorReading]) -> Vec<AnomalyAlert> {
        if !self.is_trained() {
            debug!("Outlier model not trained, skipping scoring");
            return Vec::new();
        }

        readings
            .iter()
            .zip(self.verdicts(readings))
            .filter(|(_, verdict)| verdict.is_outlier)
            .map(|(reading, verdict)| build_alert(reading, verdict.score))
            .collect()
    }
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self::new(ForestConfig::default())
    }
}

/// Expected range annotation attached to model alerts
pub fn expected_range(metric: Metric) -> (f64, f64) {
    match metric {
        Metric::Voltage => (200.0, 250.0),
        Metric::Current => (0.0, 10.0),
        Metric::Temperature => (0.0, 80.0),
    }
}

fn build_alert(reading: &SensorReading, score: f64) -> AnomalyAlert {
    let metric = attribute_metric(reading);
    let value = reading.value(metric);

    AnomalyAlert {
        device_id: reading.device_id.clone(),
        timestamp: reading.timestamp,
        metric,
        value,
        expected_range: expected_range(metric),
        severity: score_severity(score),
        description: format!(
            "IsolationForest detected {} anomaly: {}{} (score: {:.3})",
            metric,
            value,
            metric.unit(),
            score
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn nominal_readings(n: usize, seed: u64) -> Vec<SensorReading> {
        let mut rng = StdRng::seed_from_u64(seed);
        let start = Utc::now() - Duration::hours(2);
        (0..n)
            .map(|i| {
                SensorReading::new(
                    format!("grid-{}", i % 5),
                    start + Duration::seconds(i as i64 * 30),
                    rng.gen_range(227.0..233.0),
                    rng.gen_range(3.5..4.5),
                    rng.gen_range(32.0..38.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_score_before_training_is_empty() {
        let detector = OutlierDetector::default();
        assert!(!detector.is_trained());
        assert!(detector.score(&nominal_readings(20, 1)).is_empty());
    }

    #[test]
    fn test_insufficient_training_data_keeps_state() {
        let mut detector = OutlierDetector::default();
        let outcome = detector.train(&nominal_readings(9, 1)).unwrap();
        assert_eq!(outcome, TrainingOutcome::InsufficientData { samples: 9 });
        assert!(!detector.is_trained());

        detector.train(&nominal_readings(50, 2)).unwrap();
        let offset = detector.model().unwrap().forest.offset();

        detector.train(&nominal_readings(3, 3)).unwrap();
        assert!(detector.is_trained());
        assert_eq!(detector.model().unwrap().forest.offset(), offset);
        assert_eq!(detector.model().unwrap().training_samples, 50);
    }

    #[test]
    fn test_empty_input_scores_nothing() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(50, 2)).unwrap();
        assert!(detector.score(&[]).is_empty());
    }

    #[test]
    fn test_reset_returns_to_untrained() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(50, 2)).unwrap();
        assert!(detector.is_trained());
        detector.reset();
        assert!(!detector.is_trained());
        assert!(detector.score(&nominal_readings(20, 4)).is_empty());
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(200, 5)).unwrap();

        let batch = nominal_readings(100, 6);
        assert_eq!(detector.score(&batch), detector.score(&batch));
    }

    #[test]
    fn test_scoring_uses_training_parameters() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(200, 5)).unwrap();

        // Alone, an extreme reading must still be flagged; refitting the
        // scaler on the score batch would hide it.
        let extreme = SensorReading::new("grid-9", Utc::now(), 280.0, 9.0, 75.0);
        let alerts = detector.score(std::slice::from_ref(&extreme));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_extreme_readings_flagged_with_attribution() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(200, 8)).unwrap();

        let mut batch = nominal_readings(40, 9);
        let now = Utc::now();
        for k in 0..5 {
            batch.insert(
                k * 8,
                SensorReading::new(
                    format!("faulty-{}", k),
                    now + Duration::seconds(k as i64),
                    280.0,
                    9.0,
                    75.0,
                ),
            );
        }

        let alerts = detector.score(&batch);
        let faulty: Vec<&AnomalyAlert> = alerts
            .iter()
            .filter(|a| a.device_id.starts_with("faulty-"))
            .collect();
        assert_eq!(faulty.len(), 5);
        for alert in faulty {
            // |280-230| = 50 beats |75-35| = 40 and |9-4| = 5
            assert_eq!(alert.metric, Metric::Voltage);
            assert_eq!(alert.value, 280.0);
            assert_eq!(alert.expected_range, (200.0, 250.0));
            assert!(alert.description.contains("score"));
        }
    }

    #[test]
    fn test_verdict_scores_in_range() {
        let mut detector = OutlierDetector::default();
        detector.train(&nominal_readings(100, 10)).unwrap();
        let verdicts = detector.verdicts(&nominal_readings(30, 11));
        assert_eq!(verdicts.len(), 30);
        assert!(verdicts.iter().all(|v| v.score < 0.0 && v.score > -1.0));
    }
}

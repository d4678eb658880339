//! Severity classification and metric attribution shared by both detectors

use crate::models::{AnomalyAlert, Metric, SensorReading, Severity};

/// Deviation (in standard deviations) at which the threshold detector alerts
pub const ALERT_SIGMA: f64 = 3.0;

/// Deviation at which a statistical alert becomes high severity
pub const HIGH_SIGMA: f64 = 4.0;

/// Model scores below this are high severity
pub const MODEL_HIGH_SCORE: f64 = -0.5;

/// Model scores below this are medium severity
pub const MODEL_MEDIUM_SCORE: f64 = -0.3;

/// Severity tier for a statistical deviation
///
/// Returns `None` below the alert gate. `low_sigma` opens a low tier in
/// `[low_sigma, ALERT_SIGMA)` when set.
pub fn deviation_severity(deviation: f64, low_sigma: Option<f64>) -> Option<Severity> {
    if deviation >= HIGH_SIGMA {
        Some(Severity::High)
    } else if deviation >= ALERT_SIGMA {
        Some(Severity::Medium)
    } else {
        match low_sigma {
            Some(low) if deviation >= low => Some(Severity::Low),
            _ => None,
        }
    }
}

/// Severity tier for an isolation forest score (more negative is worse)
pub fn score_severity(score: f64) -> Severity {
    if score < MODEL_HIGH_SCORE {
        Severity::High
    } else if score < MODEL_MEDIUM_SCORE {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Pick the most severe alert; the earliest one wins ties
pub fn most_severe(alerts: Vec<AnomalyAlert>) -> Option<AnomalyAlert> {
    let mut best: Option<AnomalyAlert> = None;
    for alert in alerts {
        match &best {
            Some(current) if alert.severity <= current.severity => {}
            _ => best = Some(alert),
        }
    }
    best
}

/// Metric with the largest absolute deviation from nominal
///
/// Ties resolve in evaluation order: voltage, then current, then temperature.
pub fn attribute_metric(reading: &SensorReading) -> Metric {
    let mut best = Metric::Voltage;
    let mut best_dev = nominal_deviation(reading, best);
    for metric in [Metric::Current, Metric::Temperature] {
        let dev = nominal_deviation(reading, metric);
        if dev > best_dev {
            best = metric;
            best_dev = dev;
        }
    }
    best
}

fn nominal_deviation(reading: &SensorReading, metric: Metric) -> f64 {
    (reading.value(metric) - metric.nominal()).abs()
}

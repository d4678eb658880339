//! Core data models for the anomaly detector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped sample from a grid device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

impl SensorReading {
    pub fn new(
        device_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        voltage: f64,
        current: f64,
        temperature: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            voltage,
            current,
            temperature,
        }
    }

    /// Raw value of the given metric
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Voltage => self.voltage,
            Metric::Current => self.current,
            Metric::Temperature => self.temperature,
        }
    }
}

/// Monitored electrical metric
///
/// Declaration order is the fixed evaluation order used for tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Voltage,
    Current,
    Temperature,
}

impl Metric {
    /// All metrics in evaluation order
    pub const ALL: [Metric; 3] = [Metric::Voltage, Metric::Current, Metric::Temperature];

    /// Nominal operating value
    pub fn nominal(&self) -> f64 {
        match self {
            Metric::Voltage => 230.0,
            Metric::Current => 4.0,
            Metric::Temperature => 35.0,
        }
    }

    /// Nominal standard deviation used when history cannot provide one
    pub fn nominal_std_dev(&self) -> f64 {
        match self {
            Metric::Voltage => 5.0,
            Metric::Current => 1.0,
            Metric::Temperature => 5.0,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Voltage => "V",
            Metric::Current => "A",
            Metric::Temperature => "°C",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Voltage => "voltage",
            Metric::Current => "current",
            Metric::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity tier, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly raised for a single reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub metric: Metric,
    pub value: f64,
    /// Serialized as `[min, max]`
    pub expected_range: (f64, f64),
    pub severity: Severity,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_alert_wire_format() {
        let alert = AnomalyAlert {
            device_id: "sensor-7".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            metric: Metric::Temperature,
            value: 75.5,
            expected_range: (0.0, 70.0),
            severity: Severity::High,
            description: "too hot".to_string(),
        };

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["metric"], "temperature");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["expected_range"], serde_json::json!([0.0, 70.0]));
        assert_eq!(json["timestamp"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn test_reading_accepts_offset_timestamps() {
        let raw = r#"{"device_id":"d1","timestamp":"2024-03-01T14:30:00+02:00","voltage":231.0,"current":4.1,"temperature":36.0}"#;
        let reading: SensorReading = serde_json::from_str(raw).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
        );
        assert_eq!(reading.value(Metric::Current), 4.1);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}

//! Bounded per-device history used as statistical context
//!
//! Readings are kept oldest first; once capacity is exceeded the oldest
//! entries are evicted (FIFO).

use std::collections::VecDeque;

use crate::models::{Metric, SensorReading};

/// Default number of readings kept per device
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Capacity-bounded ordered sequence of recent readings for one device
#[derive(Debug, Clone)]
pub struct HistoricalWindow {
    readings: VecDeque<SensorReading>,
    capacity: usize,
}

impl HistoricalWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity.min(DEFAULT_WINDOW_CAPACITY)),
            capacity,
        }
    }

    /// Build a window from readings ordered oldest first, keeping the newest
    pub fn from_oldest_first(readings: Vec<SensorReading>, capacity: usize) -> Self {
        let mut window = Self::new(capacity);
        for reading in readings {
            window.push(reading);
        }
        window
    }

    /// Build a window from a storage result ordered newest first
    pub fn from_newest_first(mut readings: Vec<SensorReading>, capacity: usize) -> Self {
        readings.reverse();
        Self::from_oldest_first(readings, capacity)
    }

    /// Append a reading, evicting the oldest entries past capacity
    pub fn push(&mut self, reading: SensorReading) {
        self.readings.push_back(reading);
        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    /// Baseline for one metric, falling back to nominal constants
    ///
    /// With one point the mean comes from history and the std-dev is nominal;
    /// with two or more the sample std-dev (Bessel's correction) is used.
    pub fn baseline(&self, metric: Metric) -> Baseline {
        let count = self.readings.len();
        if count == 0 {
            return Baseline::nominal(metric);
        }

        let mean = self.readings.iter().map(|r| r.value(metric)).sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let variance = self
                .readings
                .iter()
                .map(|r| (r.value(metric) - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            metric.nominal_std_dev()
        };

        Baseline { mean, std_dev }
    }
}

impl Default for HistoricalWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

/// Reference mean and standard deviation for deviation scoring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
}

impl Baseline {
    pub fn nominal(metric: Metric) -> Self {
        Self {
            mean: metric.nominal(),
            std_dev: metric.nominal_std_dev(),
        }
    }

    /// Distance from the mean in standard deviations; zero when std-dev is zero
    pub fn deviation(&self, value: f64) -> f64 {
        if self.std_dev > 0.0 {
            (value - self.mean).abs() / self.std_dev
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn readings(voltages: &[f64]) -> Vec<SensorReading> {
        let start = Utc::now();
        voltages
            .iter()
            .enumerate()
            .map(|(i, v)| {
                SensorReading::new("d1", start + Duration::seconds(i as i64), *v, 4.0, 35.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_window_uses_nominal() {
        let window = HistoricalWindow::default();
        assert_eq!(window.baseline(Metric::Voltage), Baseline::nominal(Metric::Voltage));
    }

    #[test]
    fn test_single_point_uses_nominal_std_dev() {
        let window = HistoricalWindow::from_oldest_first(readings(&[240.0]), 10);
        let baseline = window.baseline(Metric::Voltage);
        assert_eq!(baseline.mean, 240.0);
        assert_eq!(baseline.std_dev, 5.0);
    }

    #[test]
    fn test_sample_std_dev() {
        let window = HistoricalWindow::from_oldest_first(readings(&[228.0, 230.0, 232.0]), 10);
        let baseline = window.baseline(Metric::Voltage);
        assert!((baseline.mean - 230.0).abs() < 1e-9);
        assert!((baseline.std_dev - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut window = HistoricalWindow::new(3);
        for r in readings(&[1.0, 2.0, 3.0, 4.0, 5.0]) {
            window.push(r);
        }
        assert_eq!(window.len(), 3);
        let kept: Vec<f64> = window.iter().map(|r| r.voltage).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_newest_first_is_reordered() {
        let mut rs = readings(&[1.0, 2.0, 3.0, 4.0]);
        rs.reverse();
        let window = HistoricalWindow::from_newest_first(rs, 3);
        let kept: Vec<f64> = window.iter().map(|r| r.voltage).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_std_dev_deviation_is_zero() {
        let window = HistoricalWindow::from_oldest_first(readings(&[230.0, 230.0, 230.0]), 10);
        let baseline = window.baseline(Metric::Voltage);
        assert_eq!(baseline.std_dev, 0.0);
        assert_eq!(baseline.deviation(245.0), 0.0);
    }
}

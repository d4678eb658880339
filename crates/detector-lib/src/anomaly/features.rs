//! Feature engineering for the outlier model
//!
//! Each reading becomes six features: the raw metrics, a power proxy and
//! the distances of voltage and current from nominal. Features are
//! standardized column-wise with parameters fit on the training set.

use crate::models::{Metric, SensorReading};

/// Number of features per reading
pub const NUM_FEATURES: usize = 6;

pub type Features = [f64; NUM_FEATURES];

/// Feature vector for one reading
pub fn features(reading: &SensorReading) -> Features {
    [
        reading.voltage,
        reading.current,
        reading.temperature,
        reading.voltage * reading.current,
        (reading.voltage - Metric::Voltage.nominal()).abs(),
        (reading.current - Metric::Current.nominal()).abs(),
    ]
}

/// Feature matrix for a batch of readings
pub fn feature_matrix(readings: &[SensorReading]) -> Vec<Features> {
    readings.iter().map(features).collect()
}

/// Column-wise zero-mean, unit-variance scaler
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    means: Features,
    scales: Features,
}

impl Standardizer {
    /// Fit on a feature matrix
    ///
    /// Uses the population standard deviation; constant columns get a scale
    /// of 1 so they map to zero instead of dividing by zero.
    pub fn fit(rows: &[Features]) -> Self {
        let mut means = [0.0; NUM_FEATURES];
        let mut scales = [1.0; NUM_FEATURES];
        if rows.is_empty() {
            return Self { means, scales };
        }

        let n = rows.len() as f64;
        for col in 0..NUM_FEATURES {
            let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
            let variance = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
            let std_dev = variance.sqrt();

            means[col] = mean;
            scales[col] = if std_dev > f64::EPSILON { std_dev } else { 1.0 };
        }

        Self { means, scales }
    }

    pub fn transform_row(&self, row: &Features) -> Features {
        let mut out = [0.0; NUM_FEATURES];
        for col in 0..NUM_FEATURES {
            out[col] = (row[col] - self.means[col]) / self.scales[col];
        }
        out
    }

    pub fn transform(&self, rows: &[Features]) -> Vec<Features> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn means(&self) -> &Features {
        &self.means
    }

    pub fn scales(&self) -> &Features {
        &self.scales
    }
}

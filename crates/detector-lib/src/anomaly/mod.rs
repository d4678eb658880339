//! Anomaly detection for grid sensor readings
//!
//! This module provides detection for:
//! - Safety-limit and statistical deviations per metric (threshold detector)
//! - Multi-metric outliers scored by an isolation forest (outlier detector)
//! - Alert delivery to logs, channels and webhooks

mod alerter;
pub mod features;
pub mod forest;
mod outlier;
pub mod severity;
mod threshold;
mod window;

pub use alerter::{AlertSink, ChannelAlertSink, LogAlertSink, WebhookAlertSink};
pub use forest::{ForestConfig, IsolationForest};
pub use outlier::{
    expected_range as model_expected_range, FittedModel, ModelVerdict, OutlierDetector,
    TrainingOutcome, MIN_TRAINING_SAMPLES,
};
pub use severity::{attribute_metric, most_severe};
pub use threshold::{
    expected_range as threshold_expected_range, ThresholdConfig, ThresholdDetector,
};
pub use window::{Baseline, HistoricalWindow, DEFAULT_WINDOW_CAPACITY};

//! Detector configuration
//!
//! Layered as: serde defaults, then an optional TOML file, then
//! `DETECTOR_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use detector_lib::anomaly::{ForestConfig, ThresholdConfig};
use detector_lib::scheduler::{DetectionConfig, DetectionMode};
use serde::Deserialize;

/// Command-line interface
#[derive(Debug, Parser)]
#[command(name = "gridwatch-detector")]
#[command(author, version, about = "Anomaly detection for grid sensor readings", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "DETECTOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Expected outlier fraction for the model, in (0, 0.5]
    #[arg(long)]
    pub contamination: Option<f64>,

    /// Age limit for training data
    #[arg(long, value_name = "HOURS")]
    pub lookback_hours: Option<u64>,

    /// Sleep between detection cycles
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Recent readings analysed per cycle
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Detectors to run: model, threshold or combined
    #[arg(long)]
    pub mode: Option<DetectionMode>,

    /// Run a single detection cycle and exit
    #[arg(long)]
    pub once: bool,

    /// JSON-lines file of readings to seed the store with
    #[arg(long, value_name = "FILE")]
    pub readings_file: Option<PathBuf>,

    /// POST alerts to this URL instead of logging them
    #[arg(long, value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Port for the health and metrics server
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Abandon cycles running longer than this
    #[arg(long, value_name = "SECONDS")]
    pub cycle_timeout: Option<u64>,

    /// Raise low-severity threshold alerts from this many standard deviations
    #[arg(long, value_name = "SIGMA")]
    pub low_sigma: Option<f64>,
}

/// Detector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// Detection interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default)]
    pub mode: DetectionMode,

    /// Optional low-severity sub-threshold for the threshold detector
    #[serde(default)]
    pub low_sigma: Option<f64>,

    #[serde(default)]
    pub once: bool,

    #[serde(default)]
    pub readings_file: Option<PathBuf>,

    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "gridwatch-detector".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    1000
}

fn default_lookback_hours() -> u64 {
    24
}

fn default_interval() -> u64 {
    60
}

fn default_cycle_timeout() -> u64 {
    30
}

fn default_contamination() -> f64 {
    0.1
}

impl DetectorConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("DETECTOR").try_parsing(true))
            .build()
            .context("Failed to read detector configuration")?;

        config
            .try_deserialize()
            .context("Invalid detector configuration")
    }

    /// Apply command-line flags on top of loaded values
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(contamination) = cli.contamination {
            self.contamination = contamination;
        }
        if let Some(hours) = cli.lookback_hours {
            self.lookback_hours = hours;
        }
        if let Some(interval) = cli.interval {
            self.interval_secs = interval;
        }
        if let Some(batch_size) = cli.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if cli.once {
            self.once = true;
        }
        if let Some(path) = &cli.readings_file {
            self.readings_file = Some(path.clone());
        }
        if let Some(url) = &cli.webhook_url {
            self.webhook_url = Some(url.clone());
        }
        if let Some(port) = cli.api_port {
            self.api_port = port;
        }
        if let Some(timeout) = cli.cycle_timeout {
            self.cycle_timeout_secs = timeout;
        }
        if let Some(sigma) = cli.low_sigma {
            self.low_sigma = Some(sigma);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            bail!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.interval_secs == 0 {
            bail!("interval must be greater than zero");
        }
        if self.cycle_timeout_secs == 0 {
            bail!("cycle_timeout must be greater than zero");
        }
        if let Some(sigma) = self.low_sigma {
            if !(sigma > 0.0 && sigma < 3.0) {
                bail!("low_sigma must be in (0, 3), got {}", sigma);
            }
        }
        Ok(())
    }

    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            batch_size: self.batch_size,
            lookback: Duration::from_secs(self.lookback_hours * 60 * 60),
            interval: Duration::from_secs(self.interval_secs),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            mode: self.mode,
        }
    }

    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            contamination: self.contamination,
            ..ForestConfig::default()
        }
    }

    pub fn threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            low_sigma: self.low_sigma,
            ..ThresholdConfig::default()
        }
    }
}

//! Alert emission for detected anomalies
//!
//! Handles:
//! - The alert channel seam (`AlertSink`)
//! - Structured-log delivery when no channel is configured
//! - In-process fan-out over a bounded channel
//! - Webhook delivery of the JSON alert body

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::models::AnomalyAlert;
use crate::observability::StructuredLogger;

pub use async_trait::async_trait;

/// Default webhook request timeout
const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for anomaly alerts
///
/// Delivery is best-effort; callers log failures and move on.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &AnomalyAlert) -> Result<(), SinkError>;
}

/// Writes alerts to the structured log instead of an external channel
#[derive(Clone)]
pub struct LogAlertSink {
    logger: StructuredLogger,
}

impl LogAlertSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

impl Default for LogAlertSink {
    fn default() -> Self {
        Self::new(StructuredLogger::new("gridwatch-detector"))
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn publish(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        self.logger.log_anomaly(alert);
        Ok(())
    }
}

/// Forwards alerts to an in-process consumer
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<AnomalyAlert>,
}

impl ChannelAlertSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AnomalyAlert>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn publish(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        self.tx
            .send(alert.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// POSTs each alert as JSON to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn publish(&self, alert: &AnomalyAlert) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }
}

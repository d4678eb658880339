//! Bounded in-process reading store
//!
//! Holds readings in arrival order with FIFO eviction past `max_readings`
//! and answers newest-first queries by timestamp.

use std::collections::VecDeque;
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{async_trait, ReadingStore};
use crate::error::StoreError;
use crate::models::SensorReading;

/// Default maximum number of readings held (100,000 entries)
pub const DEFAULT_MAX_READINGS: usize = 100_000;

/// In-memory ring buffer of readings
pub struct MemoryStore {
    readings: RwLock<VecDeque<SensorReading>>,
    max_readings: usize,
}

impl MemoryStore {
    pub fn new(max_readings: usize) -> Self {
        Self {
            readings: RwLock::new(VecDeque::with_capacity(max_readings.min(10_000))),
            max_readings,
        }
    }

    pub fn with_readings(readings: Vec<SensorReading>) -> Self {
        let max_readings = readings.len().max(DEFAULT_MAX_READINGS);
        Self {
            readings: RwLock::new(readings.into()),
            max_readings,
        }
    }

    pub async fn len(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_READINGS)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn get_recent(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().await;
        let mut matching: Vec<SensorReading> = readings
            .iter()
            .rev()
            .filter(|r| device_id.map_or(true, |id| r.device_id == id))
            .cloned()
            .collect();
        drop(readings);

        // Stable sort over reversed arrival: ties come back latest arrival first
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn insert_batch(&self, batch: &[SensorReading]) -> Result<(), StoreError> {
        let mut readings = self.readings.write().await;
        readings.extend(batch.iter().cloned());

        let overflow = readings.len().saturating_sub(self.max_readings);
        if overflow > 0 {
            readings.drain(..overflow);
            debug!(evicted = overflow, "Evicted oldest readings from memory store");
        }
        Ok(())
    }
}

/// Load readings from a JSON-lines replay file
///
/// One `SensorReading` object per line; blank lines are skipped.
pub async fn load_readings(path: &Path) -> Result<Vec<SensorReading>, StoreError> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut readings = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reading = serde_json::from_str(line).map_err(|source| StoreError::Malformed {
            line: idx + 1,
            source,
        })?;
        readings.push(reading);
    }

    info!(path = %path.display(), count = readings.len(), "Loaded readings from replay file");
    Ok(readings)
}

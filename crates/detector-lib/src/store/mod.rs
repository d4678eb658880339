//! Time-series storage collaborator
//!
//! The real database lives outside this crate; the detector only needs the
//! newest-first query below. `MemoryStore` backs tests and file replay.

mod memory;

pub use memory::{load_readings, MemoryStore, DEFAULT_MAX_READINGS};

use crate::error::StoreError;
use crate::models::SensorReading;

pub use async_trait::async_trait;

/// Source of recent sensor readings
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Most recent readings, newest first, optionally for a single device
    async fn get_recent(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SensorReading>, StoreError>;

    /// Append a batch of readings
    async fn insert_batch(&self, readings: &[SensorReading]) -> Result<(), StoreError>;
}

//! Detector library for grid sensor anomaly detection
//!
//! This crate provides the core functionality for:
//! - Threshold and isolation-forest anomaly detection
//! - Reading storage and alert delivery seams
//! - Scheduled detection cycles
//! - Health checks and observability

pub mod anomaly;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod store;

pub use error::{SinkError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, CycleSummary, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{DetectorMetrics, StructuredLogger};
pub use scheduler::{
    CycleOutcome, CycleReport, DetectionConfig, DetectionMode, DetectionScheduler,
};
pub use store::{MemoryStore, ReadingStore};

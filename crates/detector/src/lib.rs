//! Grid sensor anomaly detection service
//!
//! Configuration and the health/metrics HTTP surface, shared by the
//! binary and its integration tests.

pub mod api;
pub mod config;

//! System-level facilities: metrics and monitoring

/// Prometheus metrics collection
pub mod metrics;

pub use metrics::Metrics;

//! Sensor ingest: per-frame input types and dataset replay
//!
//! The pipeline consumes posed RGB-D frames; this module provides the frame
//! type and a loader that replays TUM-format sequences from disk.

/// Posed RGB-D frame type
pub mod frame;
/// TUM RGB-D sequence loader
pub mod tum;

pub use frame::SensorFrame;
pub use tum::TumDataset;

//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the voxel-hash
//! pipeline: error handling, configuration, and the plain-old-data types
//! shared by every stage.

/// Error types and result handling
pub mod error;
/// Configuration management
pub mod config;
/// Core data types: coordinates, voxels, blocks, parameter structs
pub mod types;

// Re-export commonly used items
pub use config::Config;
pub use error::{Error, Result, VolumeError};
pub use types::{BlockCoord, EntrySlot, SensorParams, VolumeParams, Voxel, VoxelBlock};

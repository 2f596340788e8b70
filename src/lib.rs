//! voxel-hash - sparse voxel-block hashing for real-time TSDF reconstruction
//!
//! The crate maintains a truncated signed distance function in a sparsely
//! allocated voxel volume: a lock-free, open-addressed hash map from
//! integer block coordinates to fixed-size voxel blocks, backed by a
//! free-list heap, streamed against the depth frustum every frame and
//! garbage-collected by a decay-based recycler. Fusion, dataset replay and
//! the demo binary drive the volume through the same narrow boundary that
//! external meshers and ray casters consume.
#![warn(missing_docs)]

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Compile-time constants shared across modules
pub mod constants;

// Core foundational modules
pub mod core;

// Main functional modules
pub mod fuse;
pub mod geometry;
pub mod sensor;
pub mod streaming;
pub mod system;
pub mod volume;

// Re-export commonly used items for convenience
pub use crate::core::{BlockCoord, Config, Error, Result, VolumeError};
pub use crate::volume::VoxelMap;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the pipeline with tracing and metrics
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    system::metrics::init_registry();

    Ok(())
}

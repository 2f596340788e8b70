//! Depth-map fusion into the sparse TSDF volume

/// Weighted-average TSDF integration over visible blocks
pub mod integrator;

pub use integrator::{FusionStats, Integrator};

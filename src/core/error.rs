//! Error types and handling for the voxel-hash pipeline
//!
//! This module defines all error types used throughout the system. Resource
//! exhaustion inside a frame is deliberately *not* fatal: the streaming
//! controller counts and logs it, skips the affected block, and the frame
//! stays usable.

use std::path::PathBuf;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the voxel-hash pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sparse volume resource errors
    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    /// Dataset ingest errors
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Resource errors surfaced at the sparse-volume boundary.
///
/// Both variants are transient: capacity is fixed at construction, so the
/// only remedies are recycling or a larger configuration. `find` misses are
/// a value (`Option::None`), never an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    /// The block heap's free stack is empty
    #[error("block heap exhausted")]
    HeapExhausted,

    /// No free overflow entry remains for a colliding insertion
    #[error("hash entry pool exhausted")]
    EntryPoolExhausted,
}

/// Errors from the TUM dataset loader
#[derive(Error, Debug)]
pub enum DatasetError {
    /// A list or association file was missing
    #[error("missing dataset file: {0}")]
    MissingFile(PathBuf),

    /// A list or association line did not parse
    #[error("malformed dataset line: {0}")]
    Malformed(String),

    /// An image failed to decode
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    /// Depth image dimensions did not match the configured sensor
    #[error("frame size {got_w}x{got_h} does not match sensor {want_w}x{want_h}")]
    SizeMismatch {
        /// Decoded image width
        got_w: u32,
        /// Decoded image height
        got_h: u32,
        /// Configured sensor width
        want_w: u32,
        /// Configured sensor height
        want_h: u32,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error is a transient resource condition that a frame may
    /// absorb (counted and logged, not propagated).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Volume(VolumeError::HeapExhausted)
                | Error::Volume(VolumeError::EntryPoolExhausted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        // Goal: exhaustion is transient, everything else is not
        assert!(Error::from(VolumeError::HeapExhausted).is_transient());
        assert!(Error::from(VolumeError::EntryPoolExhausted).is_transient());
        assert!(!Error::config("bad").is_transient());
    }
}

//! Configuration management for the voxel-hash pipeline
//!
//! All capacities are fixed at construction: the heap, the entry array and
//! the visible list are allocated once and never grow, so the configuration
//! is validated up front and then frozen.

use crate::constants::{
    DEFAULT_BUCKET_SIZE, DEFAULT_MAX_IDLE_FRAMES, DEFAULT_RECYCLER_SHARDS, DEFAULT_WEIGHT_EPSILON,
};
use crate::core::error::{Error, Result};
use crate::core::types::{SensorParams, VolumeParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Sparse volume geometry and capacities
    pub volume: VolumeConfig,

    /// Depth sensor intrinsics and range
    pub sensor: SensorConfig,

    /// Recycler policy
    pub recycler: RecyclerConfig,

    /// Parallel execution tuning
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sparse volume geometry and capacities.
///
/// This is the unified parameter surface: geometric constants and hash/heap
/// capacities live together because both are frozen at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Edge length of one voxel, meters
    pub voxel_size: f32,

    /// Base truncation distance, meters
    pub truncation_distance: f32,

    /// Depth-proportional truncation growth per meter
    pub truncation_distance_scale: f32,

    /// Weight contributed by one depth sample
    pub weight_sample: f32,

    /// Saturation bound for accumulated voxel weights
    pub weight_upper_bound: f32,

    /// Clamp for stored signed distances, meters
    pub sdf_upper_bound: f32,

    /// Number of hash buckets (a prime is recommended)
    pub bucket_count: u32,

    /// Entries per bucket
    pub bucket_size: u32,

    /// Capacity of the voxel-block heap
    pub block_count: u32,

    /// Total hash entries, primary plus overflow
    /// (must be at least `bucket_count · bucket_size · 2`)
    pub entry_count: u32,
}

/// Depth sensor intrinsics and trusted range
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Focal length x, pixels
    pub fx: f32,
    /// Focal length y, pixels
    pub fy: f32,
    /// Principal point x, pixels
    pub cx: f32,
    /// Principal point y, pixels
    pub cy: f32,
    /// Image width, pixels
    pub width: u32,
    /// Image height, pixels
    pub height: u32,
    /// Nearest trusted depth, meters
    pub min_depth: f32,
    /// Farthest trusted depth, meters
    pub max_depth: f32,
}

/// Recycler policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclerConfig {
    /// Frames a block may go untouched before reclamation
    pub max_idle_frames: u32,

    /// Weight below which a voxel counts as unobserved
    pub weight_epsilon: f32,

    /// Shards the entry array is divided into for the amortized sweep
    pub shard_count: u32,
}

/// Parallel execution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker lanes (0 = one per CPU core)
    pub worker_threads: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (None = stdout)
    pub file: Option<PathBuf>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.004,
            truncation_distance: 0.02,
            truncation_distance_scale: 0.01,
            weight_sample: 10.0,
            weight_upper_bound: 255.0,
            sdf_upper_bound: 4.0,
            bucket_count: 100_003,
            bucket_size: DEFAULT_BUCKET_SIZE,
            block_count: 65_536,
            entry_count: 2 * 100_003 * DEFAULT_BUCKET_SIZE,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        // TUM fr1 Freenect intrinsics
        Self {
            fx: 517.306_4,
            fy: 516.469_2,
            cx: 318.643_04,
            cy: 255.313_99,
            width: 640,
            height: 480,
            min_depth: 0.5,
            max_depth: 5.0,
        }
    }
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            max_idle_frames: DEFAULT_MAX_IDLE_FRAMES,
            weight_epsilon: DEFAULT_WEIGHT_EPSILON,
            shard_count: DEFAULT_RECYCLER_SHARDS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(v) = env::var("VH_VOXEL_SIZE") {
            self.volume.voxel_size = v
                .parse()
                .map_err(|e| Error::config(format!("Invalid voxel size: {}", e)))?;
        }

        if let Ok(v) = env::var("VH_BLOCK_COUNT") {
            self.volume.block_count = v
                .parse()
                .map_err(|e| Error::config(format!("Invalid block count: {}", e)))?;
        }

        if let Ok(v) = env::var("VH_BUCKET_COUNT") {
            self.volume.bucket_count = v
                .parse()
                .map_err(|e| Error::config(format!("Invalid bucket count: {}", e)))?;
        }

        if let Ok(v) = env::var("VH_WORKER_THREADS") {
            self.pipeline.worker_threads = v
                .parse()
                .map_err(|e| Error::config(format!("Invalid worker threads: {}", e)))?;
        }

        if let Ok(level) = env::var("VH_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let v = &self.volume;

        if v.voxel_size <= 0.0 {
            return Err(Error::config("voxel_size must be positive"));
        }
        if v.truncation_distance <= 0.0 {
            return Err(Error::config("truncation_distance must be positive"));
        }
        if v.bucket_count == 0 || v.bucket_size == 0 || v.block_count == 0 {
            return Err(Error::config("capacities must be non-zero"));
        }
        // Overflow insertion needs headroom beyond the primary region.
        let primary = v.bucket_count as u64 * v.bucket_size as u64;
        if (v.entry_count as u64) < primary * 2 {
            return Err(Error::config(
                "entry_count must be at least bucket_count * bucket_size * 2",
            ));
        }

        let s = &self.sensor;
        if s.width == 0 || s.height == 0 {
            return Err(Error::config("sensor dimensions must be non-zero"));
        }
        if !(s.min_depth > 0.0 && s.max_depth > s.min_depth) {
            return Err(Error::config("depth range must satisfy 0 < min < max"));
        }

        if self.recycler.shard_count == 0 {
            return Err(Error::config("recycler shard_count must be non-zero"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        Ok(())
    }

    /// Number of worker lanes after auto-detection
    pub fn worker_threads(&self) -> usize {
        if self.pipeline.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.pipeline.worker_threads
        }
    }

    /// The by-value volume parameter struct handed to parallel stages
    pub fn volume_params(&self) -> VolumeParams {
        VolumeParams {
            voxel_size: self.volume.voxel_size,
            truncation_distance: self.volume.truncation_distance,
            truncation_distance_scale: self.volume.truncation_distance_scale,
            weight_sample: self.volume.weight_sample,
            weight_upper_bound: self.volume.weight_upper_bound,
            sdf_upper_bound: self.volume.sdf_upper_bound,
        }
    }

    /// The by-value sensor parameter struct handed to parallel stages
    pub fn sensor_params(&self) -> SensorParams {
        SensorParams {
            fx: self.sensor.fx,
            fy: self.sensor.fy,
            cx: self.sensor.cx,
            cy: self.sensor.cy,
            width: self.sensor.width,
            height: self.sensor.height,
            min_depth: self.sensor.min_depth,
            max_depth: self.sensor.max_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn entry_headroom_is_enforced() {
        // Goal: reject configurations with no room for overflow entries
        let mut config = Config::default();
        config.volume.entry_count = config.volume.bucket_count * config.volume.bucket_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn depth_range_is_enforced() {
        let mut config = Config::default();
        config.sensor.min_depth = 2.0;
        config.sensor.max_depth = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_merges_over_defaults() {
        // Goal: a file only needs the keys it wants to change
        let text = r#"
            [volume]
            voxel_size = 0.008
            bucket_count = 211

            [sensor]
            width = 320
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.volume.voxel_size, 0.008);
        assert_eq!(config.volume.bucket_count, 211);
        assert_eq!(config.sensor.width, 320);
        assert_eq!(config.volume.bucket_size, DEFAULT_BUCKET_SIZE);
        assert_eq!(config.sensor.height, 480);
    }
}

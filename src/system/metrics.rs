//! Metrics collection for the reconstruction pipeline
//!
//! Prometheus counters and gauges with minimal hot-path overhead. Resource
//! exhaustion inside a frame is reported here (and logged) rather than
//! propagated, so these counters are the primary signal that a volume is
//! undersized.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};

use crate::core::error::Result;

/// Mapping-phase counters
pub struct MappingMetrics {
    /// Blocks newly allocated by the streaming pass
    pub blocks_allocated: IntCounter,
    /// Candidate block visits (pre-deduplication)
    pub candidate_visits: IntCounter,
    /// Allocations skipped because the block heap was empty
    pub heap_exhausted: IntCounter,
    /// Allocations skipped because the overflow entry pool was empty
    pub entry_pool_exhausted: IntCounter,
    /// Size of the current visible list
    pub visible_blocks: IntGauge,
}

/// Recycler counters
pub struct RecyclerMetrics {
    /// Blocks reclaimed and returned to the heap
    pub blocks_recycled: IntCounter,
    /// Decay decrements applied this run
    pub blocks_decayed: IntCounter,
}

/// Frame-level timing and occupancy
pub struct FrameMetrics {
    /// Wall time of the mapping phase
    pub mapping_seconds: Histogram,
    /// Wall time of the fusion phase
    pub fusion_seconds: Histogram,
    /// Wall time of the recycle phase
    pub recycle_seconds: Histogram,
    /// Free slots remaining in the block heap
    pub heap_free: IntGauge,
}

/// Centralized metrics collection
pub struct Metrics {
    /// Mapping-phase counters
    pub mapping: MappingMetrics,
    /// Recycler counters
    pub recycler: RecyclerMetrics,
    /// Frame-level timing and occupancy
    pub frames: FrameMetrics,
}

impl Metrics {
    /// Create and register all metric families
    pub fn new() -> Result<Self> {
        Ok(Self {
            mapping: MappingMetrics::new()?,
            recycler: RecyclerMetrics::new()?,
            frames: FrameMetrics::new()?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
        &INSTANCE
    }
}

impl MappingMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            blocks_allocated: register_int_counter!(
                "vh_blocks_allocated_total",
                "Total voxel blocks allocated"
            )?,
            candidate_visits: register_int_counter!(
                "vh_candidate_visits_total",
                "Total candidate block visits during allocation"
            )?,
            heap_exhausted: register_int_counter!(
                "vh_heap_exhausted_total",
                "Allocations skipped because the block heap was empty"
            )?,
            entry_pool_exhausted: register_int_counter!(
                "vh_entry_pool_exhausted_total",
                "Allocations skipped because the entry pool was empty"
            )?,
            visible_blocks: register_int_gauge!(
                "vh_visible_blocks",
                "Blocks in the current visible list"
            )?,
        })
    }
}

impl RecyclerMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            blocks_recycled: register_int_counter!(
                "vh_blocks_recycled_total",
                "Blocks reclaimed and returned to the heap"
            )?,
            blocks_decayed: register_int_counter!(
                "vh_blocks_decayed_total",
                "Decay decrements applied by the recycler"
            )?,
        })
    }
}

impl FrameMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            mapping_seconds: register_histogram!(
                "vh_mapping_seconds",
                "Wall time of the mapping phase"
            )?,
            fusion_seconds: register_histogram!(
                "vh_fusion_seconds",
                "Wall time of the fusion phase"
            )?,
            recycle_seconds: register_histogram!(
                "vh_recycle_seconds",
                "Wall time of the recycle phase"
            )?,
            heap_free: register_int_gauge!(
                "vh_heap_free_blocks",
                "Free slots remaining in the block heap"
            )?,
        })
    }
}

/// Force initialization of the global registry
pub fn init_registry() {
    let _ = Metrics::global();
}

//! Block decay and reclamation
//!
//! Runs after fusion each frame and bounds memory under drift and moving
//! cameras. Visible blocks that received no meaningful update lose one
//! decay point; a block whose decay reaches zero is reclaimed once every
//! voxel is outside the truncation band, or every weight is below the
//! epsilon, or the block has idled too long. Out-of-frustum blocks age
//! through a round-robin shard sweep of the entry array, so the full-table
//! cost is amortized across frames.

use glam::Mat4;
use tracing::debug;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::config::RecyclerConfig;
use crate::core::types::{BlockCoord, EntrySlot, VolumeParams};
use crate::geometry::camera::is_block_in_frustum;
use crate::system::metrics::Metrics;
use crate::volume::map::VoxelMap;

/// Per-run counters reported by the recycler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecycleStats {
    /// Decay decrements applied
    pub decayed: u64,
    /// Blocks reclaimed and returned to the heap
    pub recycled: u64,
    /// Entries examined by this frame's shard sweep
    pub swept: usize,
}

/// Decays and reclaims dead blocks.
pub struct Recycler {
    max_idle_frames: u32,
    weight_epsilon: f32,
    shard_count: u32,
    next_shard: AtomicU32,
}

impl Recycler {
    /// Create a recycler from the configured policy.
    pub fn new(config: &RecyclerConfig) -> Self {
        Self {
            max_idle_frames: config.max_idle_frames,
            weight_epsilon: config.weight_epsilon,
            shard_count: config.shard_count.max(1),
            next_shard: AtomicU32::new(0),
        }
    }

    /// Run one recycle pass: decay the visible list, sweep one shard of
    /// the entry array, and remove every deletion candidate.
    ///
    /// Invoked at most once per frame, after fusion.
    pub fn recycle(&self, map: &VoxelMap, pose: Mat4) -> RecycleStats {
        let metrics = Metrics::global();
        let timer = metrics.frames.recycle_seconds.start_timer();

        let frame = map.current_frame();
        let volume = map.volume_params();
        let sensor = map.sensor_params();
        let c_t_w = pose.inverse();

        let mut stats = RecycleStats::default();
        let mut candidates: Vec<BlockCoord> = Vec::new();

        // Visible blocks: reset decay on update, otherwise age them.
        let slots = map.visible_blocks();
        let entries = map.visible_entry_indices();
        for (&slot, &entry) in slots.iter().zip(entries) {
            if map.heap().last_update(slot) == frame {
                map.heap().decay_reset(slot);
            } else {
                stats.decayed += 1;
                if map.heap().decay_decrement(slot) == 0
                    && self.is_dead(map, slot, frame, &volume)
                {
                    candidates.push(map.hash().entry_key(entry as usize));
                }
            }
        }

        // One shard of the full entry array: ages blocks that left the
        // frustum (the visible pass never sees them again).
        let entry_count = map.hash().entry_count() as usize;
        let per_shard = entry_count.div_ceil(self.shard_count as usize);
        let shard = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shard_count;
        let begin = shard as usize * per_shard;
        let end = (begin + per_shard).min(entry_count);

        for idx in begin..end {
            let EntrySlot::Occupied(slot) = map.hash().entry_slot(idx) else {
                continue;
            };
            let key = map.hash().entry_key(idx);
            if is_block_in_frustum(&c_t_w, key, &sensor, volume.voxel_size) {
                continue;
            }
            if map.heap().last_update(slot) < frame {
                stats.decayed += 1;
                if map.heap().decay_decrement(slot) == 0
                    && self.is_dead(map, slot, frame, &volume)
                {
                    candidates.push(key);
                }
            }
        }
        stats.swept = end.saturating_sub(begin);

        for key in candidates {
            if map.remove(key) {
                stats.recycled += 1;
            }
        }

        metrics.recycler.blocks_decayed.inc_by(stats.decayed);
        metrics.recycler.blocks_recycled.inc_by(stats.recycled);
        timer.observe_duration();

        if stats.recycled > 0 {
            debug!(frame, recycled = stats.recycled, "reclaimed dead blocks");
        }

        #[cfg(debug_assertions)]
        if let Err(violation) = map.check_invariants() {
            panic!("volume invariant violated after recycle: {}", violation);
        }

        stats
    }

    /// Deletion candidacy for a fully decayed block: every voxel sits
    /// outside the truncation band, or every weight is below the epsilon,
    /// or the block has been idle too long. Each condition quantifies over
    /// the whole block, so mixed evidence (one weighted far voxel next to
    /// unobserved in-band voxels) keeps the block alive.
    fn is_dead(&self, map: &VoxelMap, slot: u32, frame: u32, volume: &VolumeParams) -> bool {
        if frame.saturating_sub(map.heap().last_update(slot)) >= self.max_idle_frames {
            return true;
        }
        let block = map.heap().block(slot);
        let all_far = block
            .voxels
            .iter()
            .all(|v| v.sdf.abs() > volume.truncation_distance);
        let all_light = block.voxels.iter().all(|v| v.weight < self.weight_epsilon);
        all_far || all_light
    }
}

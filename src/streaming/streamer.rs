//! Per-frame streaming: candidate allocation and visible-list compaction
//!
//! Every valid depth pixel votes for the blocks its measurement could
//! touch: the pixel is reprojected into the world, the view ray is expanded
//! by the truncation band, and the resulting segment is walked at block
//! granularity. Votes go straight into `alloc_if_absent`, which
//! deduplicates across lanes. Compaction then scans the whole entry array
//! and appends every live, in-frustum block to the dense visible list that
//! fusion consumes.
//!
//! Allocation touches only blocks with evidence in the current depth image;
//! compaction re-admits previously allocated blocks that remain visible, so
//! fusion continuity survives sensor noise and dropouts.

use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::constants::BLOCK_SIDE_LENGTH;
use crate::core::error::VolumeError;
use crate::core::types::{BlockCoord, EntrySlot};
use crate::geometry::camera::{is_block_in_frustum, reproject};
use crate::geometry::transforms::world_to_block;
use crate::sensor::frame::SensorFrame;
use crate::system::metrics::Metrics;
use crate::volume::map::VoxelMap;

/// Walk a world-space segment at block granularity, visiting every block
/// the segment passes through (3D DDA).
pub fn blocks_on_segment(start: Vec3, end: Vec3, voxel_size: f32, mut visit: impl FnMut(BlockCoord)) {
    let extent = voxel_size * BLOCK_SIDE_LENGTH as f32;
    let g0 = (start / extent).to_array();
    let g1 = (end / extent).to_array();

    let mut cur = [
        g0[0].floor() as i32,
        g0[1].floor() as i32,
        g0[2].floor() as i32,
    ];
    let target = [
        g1[0].floor() as i32,
        g1[1].floor() as i32,
        g1[2].floor() as i32,
    ];
    visit(BlockCoord::new(cur[0], cur[1], cur[2]));
    if cur == target {
        return;
    }

    let dir = [g1[0] - g0[0], g1[1] - g0[1], g1[2] - g0[2]];
    let mut step = [0i32; 3];
    let mut t_max = [f32::INFINITY; 3];
    let mut t_delta = [f32::INFINITY; 3];
    for axis in 0..3 {
        if dir[axis] > 0.0 {
            step[axis] = 1;
            t_max[axis] = ((cur[axis] + 1) as f32 - g0[axis]) / dir[axis];
            t_delta[axis] = 1.0 / dir[axis];
        } else if dir[axis] < 0.0 {
            step[axis] = -1;
            t_max[axis] = (g0[axis] - cur[axis] as f32) / -dir[axis];
            t_delta[axis] = -1.0 / dir[axis];
        }
    }

    let max_steps = ((target[0] - cur[0]).abs()
        + (target[1] - cur[1]).abs()
        + (target[2] - cur[2]).abs()) as usize;
    for _ in 0..max_steps {
        let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
            0
        } else if t_max[1] <= t_max[2] {
            1
        } else {
            2
        };
        cur[axis] += step[axis];
        t_max[axis] += t_delta[axis];
        visit(BlockCoord::new(cur[0], cur[1], cur[2]));
        if cur == target {
            return;
        }
    }
    // Float noise can strand the walk one cell short of the endpoint.
    if cur != target {
        visit(BlockCoord::new(target[0], target[1], target[2]));
    }
}

/// Per-frame counters reported by the mapping phase.
#[derive(Debug, Clone, Copy)]
pub struct MappingStats {
    /// Frame index assigned to this mapping pass
    pub frame: u32,
    /// Candidate block visits before hash deduplication
    pub candidates: u64,
    /// Blocks newly allocated this frame
    pub allocated: u32,
    /// Candidates dropped because the heap was exhausted
    pub heap_skipped: u64,
    /// Candidates dropped because the entry pool was exhausted
    pub entry_skipped: u64,
    /// Blocks in the compacted visible list
    pub visible: usize,
}

/// Drives candidate allocation and visible-list compaction.
pub struct StreamingController {
    workers: usize,
}

impl StreamingController {
    /// Create a controller with the given lane count (0 = one per core).
    pub fn new(worker_threads: usize) -> Self {
        let workers = if worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            worker_threads
        };
        Self { workers }
    }

    /// Run the mapping phase for one frame: begin the frame, allocate
    /// candidates from the depth image, then compact the visible list.
    pub fn mapping(&self, map: &VoxelMap, frame: &SensorFrame) -> MappingStats {
        let metrics = Metrics::global();
        let timer = metrics.frames.mapping_seconds.start_timer();

        let frame_index = map.begin_frame();
        let free_before = map.heap().free_count();

        let (candidates, heap_skipped, entry_skipped) = self.allocate(map, frame);
        self.compact_visible(map, frame.pose);

        let allocated = free_before - map.heap().free_count();
        let visible = map.visible_count();

        metrics.mapping.blocks_allocated.inc_by(allocated as u64);
        metrics.mapping.candidate_visits.inc_by(candidates);
        metrics.mapping.heap_exhausted.inc_by(heap_skipped);
        metrics.mapping.entry_pool_exhausted.inc_by(entry_skipped);
        metrics.mapping.visible_blocks.set(visible as i64);
        metrics.frames.heap_free.set(map.heap().free_count() as i64);
        timer.observe_duration();

        if heap_skipped + entry_skipped > 0 {
            warn!(
                frame = frame_index,
                heap_skipped, entry_skipped, "allocation degraded: volume capacity exhausted"
            );
        }

        MappingStats {
            frame: frame_index,
            candidates,
            allocated,
            heap_skipped,
            entry_skipped,
            visible,
        }
    }

    /// Allocation pass: one lane pool over the depth rows.
    fn allocate(&self, map: &VoxelMap, frame: &SensorFrame) -> (u64, u64, u64) {
        let sensor = map.sensor_params();
        let volume = map.volume_params();
        let origin = frame.pose.transform_point3(Vec3::ZERO);

        let candidates = AtomicU64::new(0);
        let heap_skipped = AtomicU64::new(0);
        let entry_skipped = AtomicU64::new(0);

        let rows = frame.height as usize;
        let chunk = rows.div_ceil(self.workers);

        crossbeam::thread::scope(|s| {
            for w in 0..self.workers {
                let row_begin = w * chunk;
                let row_end = ((w + 1) * chunk).min(rows);
                if row_begin >= row_end {
                    break;
                }
                let candidates = &candidates;
                let heap_skipped = &heap_skipped;
                let entry_skipped = &entry_skipped;
                s.spawn(move |_| {
                    let mut local_candidates = 0u64;
                    let mut local_heap = 0u64;
                    let mut local_entry = 0u64;

                    for v in row_begin..row_end {
                        for u in 0..frame.width {
                            let d = frame.depth_at(u, v as u32);
                            if !sensor.depth_valid(d) {
                                continue;
                            }
                            let world =
                                frame.pose.transform_point3(reproject(u, v as u32, d, &sensor));
                            let truncation = volume.truncate_distance(d);
                            let ray = world - origin;
                            let len = ray.length();
                            if len <= f32::EPSILON {
                                continue;
                            }
                            let dir = ray / len;

                            let mut lane_alloc = |coord: BlockCoord| {
                                local_candidates += 1;
                                match map.alloc_if_absent(coord) {
                                    Ok(_) => {}
                                    Err(VolumeError::HeapExhausted) => local_heap += 1,
                                    Err(VolumeError::EntryPoolExhausted) => local_entry += 1,
                                }
                            };
                            // Anchor the measured surface, then cover the
                            // truncation band around it.
                            lane_alloc(world_to_block(world, volume.voxel_size));
                            blocks_on_segment(
                                world - dir * truncation,
                                world + dir * truncation,
                                volume.voxel_size,
                                lane_alloc,
                            );
                        }
                    }

                    candidates.fetch_add(local_candidates, Ordering::Relaxed);
                    heap_skipped.fetch_add(local_heap, Ordering::Relaxed);
                    entry_skipped.fetch_add(local_entry, Ordering::Relaxed);
                });
            }
        })
        .unwrap();

        (
            candidates.load(Ordering::Relaxed),
            heap_skipped.load(Ordering::Relaxed),
            entry_skipped.load(Ordering::Relaxed),
        )
    }

    /// Compaction pass: scan every entry, keep live blocks inside the
    /// frustum. The visible list is built through an atomic cursor so
    /// lanes append without ordering.
    fn compact_visible(&self, map: &VoxelMap, pose: Mat4) {
        let sensor = map.sensor_params();
        let voxel_size = map.volume_params().voxel_size;
        let c_t_w = pose.inverse();

        let entries = map.hash().entry_count() as usize;
        let chunk = entries.div_ceil(self.workers);

        crossbeam::thread::scope(|s| {
            for w in 0..self.workers {
                let begin = w * chunk;
                let end = ((w + 1) * chunk).min(entries);
                if begin >= end {
                    break;
                }
                s.spawn(move |_| {
                    for idx in begin..end {
                        if let EntrySlot::Occupied(slot) = map.hash().entry_slot(idx) {
                            let key = map.hash().entry_key(idx);
                            if is_block_in_frustum(&c_t_w, key, &sensor, voxel_size) {
                                map.visible_push(slot, idx);
                            }
                        }
                    }
                });
            }
        })
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use glam::Mat4;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.volume.voxel_size = 0.05;
        config.volume.bucket_count = 257;
        config.volume.bucket_size = 4;
        config.volume.block_count = 2048;
        config.volume.entry_count = 257 * 4 * 2;
        config.sensor.fx = 30.0;
        config.sensor.fy = 30.0;
        config.sensor.cx = 16.0;
        config.sensor.cy = 12.0;
        config.sensor.width = 32;
        config.sensor.height = 24;
        config.sensor.min_depth = 0.2;
        config.sensor.max_depth = 5.0;
        config
    }

    fn wall_frame(config: &Config, depth_m: f32) -> SensorFrame {
        let n = (config.sensor.width * config.sensor.height) as usize;
        SensorFrame::new(
            config.sensor.width,
            config.sensor.height,
            vec![depth_m; n],
            vec![[128, 128, 128, 255]; n],
            Mat4::IDENTITY,
        )
    }

    #[test]
    fn segment_walk_covers_a_straight_run() {
        // Goal: the DDA visits each block between the endpoints once
        let mut visited = Vec::new();
        // Block extent is 0.4 m at 0.05 m voxels
        blocks_on_segment(
            Vec3::new(0.05, 0.05, 0.05),
            Vec3::new(1.95, 0.05, 0.05),
            0.05,
            |b| visited.push(b),
        );
        assert_eq!(
            visited,
            (0..5).map(|x| BlockCoord::new(x, 0, 0)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn segment_walk_handles_negative_directions() {
        let mut visited = Vec::new();
        blocks_on_segment(
            Vec3::new(0.05, 0.0, 0.0),
            Vec3::new(-0.75, 0.0, 0.0),
            0.05,
            |b| visited.push(b),
        );
        assert_eq!(visited.first(), Some(&BlockCoord::new(0, 0, 0)));
        assert_eq!(visited.last(), Some(&BlockCoord::new(-2, 0, 0)));
        assert_eq!(visited.len(), 3);
    }

    #[test]
    fn degenerate_segment_visits_one_block() {
        let mut visited = Vec::new();
        let p = Vec3::new(0.3, 0.3, 0.3);
        blocks_on_segment(p, p, 0.05, |b| visited.push(b));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn mapping_allocates_and_compacts_a_wall() {
        // Goal: a flat wall allocates its surface blocks and every one of
        // them lands in the visible list
        let config = test_config();
        let map = VoxelMap::new(&config).unwrap();
        let controller = StreamingController::new(2);

        let frame = wall_frame(&config, 2.0);
        let stats = controller.mapping(&map, &frame);

        assert!(stats.allocated > 0);
        assert_eq!(stats.heap_skipped + stats.entry_skipped, 0);
        // The block straight ahead at 2 m exists and is visible.
        let center_block = world_to_block(Vec3::new(0.0, 0.0, 2.0), 0.05);
        let slot = map.find(center_block).expect("wall block allocated");
        assert!(map.visible_blocks().contains(&slot));
        assert_eq!(stats.visible, map.visible_count());
        map.check_invariants().unwrap();
    }

    #[test]
    fn compaction_readmits_previously_allocated_blocks() {
        // Goal: a block with no evidence in the current depth image is
        // still compacted while it stays inside the frustum
        let config = test_config();
        let map = VoxelMap::new(&config).unwrap();
        let controller = StreamingController::new(2);

        let block = world_to_block(Vec3::new(0.0, 0.0, 2.0), 0.05);
        let slot = map.alloc_if_absent(block).unwrap();
        assert!(is_block_in_frustum(
            &Mat4::IDENTITY,
            block,
            &config.sensor_params(),
            0.05
        ));

        // All-hole depth image: nothing new is allocated.
        let frame = wall_frame(&config, 0.0);
        let stats = controller.mapping(&map, &frame);

        assert_eq!(stats.allocated, 0);
        assert!(map.visible_blocks().contains(&slot));
    }

    #[test]
    fn blocks_behind_the_camera_are_not_compacted() {
        let config = test_config();
        let map = VoxelMap::new(&config).unwrap();
        let controller = StreamingController::new(2);

        let behind = world_to_block(Vec3::new(0.0, 0.0, -2.0), 0.05);
        let slot = map.alloc_if_absent(behind).unwrap();

        let frame = wall_frame(&config, 0.0);
        controller.mapping(&map, &frame);

        assert!(!map.visible_blocks().contains(&slot));
        // Still allocated, just not visible.
        assert_eq!(map.find(behind), Some(slot));
    }

    #[test]
    fn heap_exhaustion_degrades_but_does_not_fail() {
        // Goal: an undersized heap yields a partial candidate set and a
        // usable frame
        let mut config = test_config();
        config.volume.block_count = 4;
        let map = VoxelMap::new(&config).unwrap();
        let controller = StreamingController::new(2);

        let frame = wall_frame(&config, 2.0);
        let stats = controller.mapping(&map, &frame);

        assert!(stats.heap_skipped > 0);
        assert_eq!(stats.allocated, 4);
        assert!(map.visible_count() <= 4);
        map.check_invariants().unwrap();
    }
}

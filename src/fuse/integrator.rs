//! TSDF depth-map integration
//!
//! Fuses one posed depth+color frame into the visible blocks: every voxel
//! of every visible block is projected into the image, compared against the
//! measured depth, and updated by weighted averaging inside the truncation
//! band. Blocks that receive at least one voxel update are stamped with the
//! frame index, which is the recycler's "meaningful update" signal.
//!
//! Each visible block is handed to exactly one lane, so voxel writes never
//! alias.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::BLOCK_VOLUME;
use crate::geometry::camera::project_to_pixel;
use crate::geometry::transforms::{block_to_voxel, idx_to_voxel_local, voxel_to_world};
use crate::sensor::frame::SensorFrame;
use crate::system::metrics::Metrics;
use crate::volume::map::VoxelMap;

/// Per-frame counters reported by fusion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionStats {
    /// Visible blocks that received at least one voxel update
    pub blocks_touched: u64,
    /// Individual voxel updates applied
    pub voxels_updated: u64,
}

/// Fuses depth frames into the sparse volume.
pub struct Integrator {
    workers: usize,
}

impl Integrator {
    /// Create an integrator with the given lane count (0 = one per core).
    pub fn new(worker_threads: usize) -> Self {
        let workers = if worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            worker_threads
        };
        Self { workers }
    }

    /// Integrate one frame into the current visible list.
    ///
    /// Must run between mapping and recycling; reads the visible list the
    /// mapping phase compacted.
    pub fn integrate(&self, map: &VoxelMap, frame: &SensorFrame) -> FusionStats {
        let metrics = Metrics::global();
        let timer = metrics.frames.fusion_seconds.start_timer();

        let frame_index = map.current_frame();
        let volume = map.volume_params();
        let sensor = map.sensor_params();
        let c_t_w = frame.pose.inverse();

        let slots = map.visible_blocks();
        let entries = map.visible_entry_indices();

        let blocks_touched = AtomicU64::new(0);
        let voxels_updated = AtomicU64::new(0);

        let chunk = slots.len().div_ceil(self.workers).max(1);
        crossbeam::thread::scope(|s| {
            for w in 0..self.workers {
                let begin = w * chunk;
                let end = ((w + 1) * chunk).min(slots.len());
                if begin >= end {
                    break;
                }
                let blocks_touched = &blocks_touched;
                let voxels_updated = &voxels_updated;
                s.spawn(move |_| {
                    let mut local_blocks = 0u64;
                    let mut local_voxels = 0u64;

                    for i in begin..end {
                        let slot = slots[i];
                        let coord = map.hash().entry_key(entries[i] as usize);
                        let base = block_to_voxel(coord);
                        // This lane is the block's only writer this frame.
                        let block = unsafe { &mut *map.block_ptr(slot) };

                        let mut touched = false;
                        for idx in 0..BLOCK_VOLUME {
                            let local = idx_to_voxel_local(idx);
                            let world =
                                voxel_to_world(base + local.as_ivec3(), volume.voxel_size);
                            let cam = c_t_w.transform_point3(world);
                            if cam.z <= 0.0 {
                                continue;
                            }
                            let px = project_to_pixel(cam, &sensor);
                            if px.x < 0
                                || px.y < 0
                                || px.x >= sensor.width as i32
                                || px.y >= sensor.height as i32
                            {
                                continue;
                            }
                            let d = frame.depth_at(px.x as u32, px.y as u32);
                            if !sensor.depth_valid(d) {
                                continue;
                            }

                            let truncation = volume.truncate_distance(d);
                            let sdf = d - cam.z;
                            if sdf <= -truncation {
                                // Occluded beyond the band; no evidence.
                                continue;
                            }
                            let sdf = sdf.min(truncation);

                            let voxel = &mut block.voxels[idx];
                            let w_old = voxel.weight;
                            let w_sum = w_old + volume.weight_sample;
                            voxel.sdf = ((voxel.sdf * w_old + sdf * volume.weight_sample)
                                / w_sum)
                                .clamp(-volume.sdf_upper_bound, volume.sdf_upper_bound);

                            let sample = frame.color_at(px.x as u32, px.y as u32);
                            for c in 0..3 {
                                let blended = (voxel.color[c] as f32 * w_old
                                    + sample[c] as f32 * volume.weight_sample)
                                    / w_sum;
                                voxel.color[c] = blended.round().clamp(0.0, 255.0) as u8;
                            }

                            voxel.weight = w_sum.min(volume.weight_upper_bound);
                            touched = true;
                            local_voxels += 1;
                        }

                        if touched {
                            map.heap().touch(slot, frame_index);
                            local_blocks += 1;
                        }
                    }

                    blocks_touched.fetch_add(local_blocks, Ordering::Relaxed);
                    voxels_updated.fetch_add(local_voxels, Ordering::Relaxed);
                });
            }
        })
        .unwrap();

        timer.observe_duration();
        FusionStats {
            blocks_touched: blocks_touched.load(Ordering::Relaxed),
            voxels_updated: voxels_updated.load(Ordering::Relaxed),
        }
    }
}

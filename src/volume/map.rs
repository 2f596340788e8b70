//! The sparse voxel map facade
//!
//! [`VoxelMap`] owns the hash table, the block heap, and the per-frame
//! visible list, and exposes the narrow surface collaborators are allowed
//! to touch: the dense visible slots, raw block access, and the three hash
//! operations. The per-frame phases (`mapping → fuse → recycle`) are driven
//! by the host loop; this type holds the state they share.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::config::Config;
use crate::core::error::{Result, VolumeError};
use crate::core::types::{BlockCoord, SensorParams, VolumeParams, VoxelBlock};
use crate::volume::hash::BlockHashTable;
use crate::volume::heap::{BlockHeap, HeapStats};

/// Shared state of the sparse TSDF volume.
pub struct VoxelMap {
    hash: BlockHashTable,
    heap: BlockHeap,

    /// Dense per-frame list of visible heap slots
    visible_slots: Box<[AtomicU32]>,
    /// Entry index owning each visible slot, for key lookups
    visible_entries: Box<[AtomicU32]>,
    visible_len: AtomicU32,

    /// Index of the frame currently being integrated
    frame: AtomicU32,

    volume: VolumeParams,
    sensor: SensorParams,
}

impl VoxelMap {
    /// Build a map from a validated configuration. All capacities are
    /// allocated here and never grow.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let v = &config.volume;
        Ok(Self {
            hash: BlockHashTable::new(v.bucket_count, v.bucket_size, v.entry_count),
            heap: BlockHeap::new(v.block_count, v.weight_upper_bound as u32),
            visible_slots: (0..v.block_count).map(|_| AtomicU32::new(0)).collect(),
            visible_entries: (0..v.block_count).map(|_| AtomicU32::new(0)).collect(),
            visible_len: AtomicU32::new(0),
            frame: AtomicU32::new(0),
            volume: config.volume_params(),
            sensor: config.sensor_params(),
        })
    }

    /// The volume parameter block handed to parallel stages.
    pub fn volume_params(&self) -> VolumeParams {
        self.volume
    }

    /// The sensor parameter block handed to parallel stages.
    pub fn sensor_params(&self) -> SensorParams {
        self.sensor
    }

    /// The block index.
    pub fn hash(&self) -> &BlockHashTable {
        &self.hash
    }

    /// The block heap.
    pub fn heap(&self) -> &BlockHeap {
        &self.heap
    }

    /// Advance to the next frame and clear the visible list. Returns the
    /// new frame index.
    pub fn begin_frame(&self) -> u32 {
        self.visible_len.store(0, Ordering::Release);
        self.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Index of the frame currently being processed.
    pub fn current_frame(&self) -> u32 {
        self.frame.load(Ordering::Acquire)
    }

    /// Look up the heap slot for a block coordinate.
    ///
    /// Used by meshing to walk 26-neighborhoods; a miss is a value.
    pub fn find(&self, coord: BlockCoord) -> Option<u32> {
        self.hash.find(coord)
    }

    /// Insert a block if absent and return its heap slot either way.
    pub fn alloc_if_absent(&self, coord: BlockCoord) -> std::result::Result<u32, VolumeError> {
        self.hash.alloc_if_absent(coord, &self.heap)
    }

    /// Remove a block, returning its heap slot to the free stack.
    ///
    /// Only the recycler calls this between frames; the map guarantees no
    /// removal happens between the start of mapping and the start of
    /// recycling within one frame.
    pub fn remove(&self, coord: BlockCoord) -> bool {
        self.hash.remove(coord, &self.heap)
    }

    /// Shared read access to one block.
    pub fn block(&self, slot: u32) -> &VoxelBlock {
        self.heap.block(slot)
    }

    /// Raw write access to one block for fusion lanes.
    pub fn block_ptr(&self, slot: u32) -> *mut VoxelBlock {
        self.heap.block_ptr(slot)
    }

    /// Raw pointer to the whole block array for external collaborators.
    pub fn blocks_ptr(&self) -> *mut VoxelBlock {
        self.heap.blocks_ptr()
    }

    /// Append a slot to the dense visible list. Called from compaction
    /// lanes; the atomic counter makes the list dense without ordering.
    pub fn visible_push(&self, slot: u32, entry: usize) {
        let i = self.visible_len.fetch_add(1, Ordering::AcqRel) as usize;
        debug_assert!(i < self.visible_slots.len());
        self.visible_slots[i].store(slot, Ordering::Release);
        self.visible_entries[i].store(entry as u32, Ordering::Release);
    }

    /// Number of blocks in the current visible list.
    pub fn visible_count(&self) -> usize {
        self.visible_len.load(Ordering::Acquire) as usize
    }

    /// The dense visible heap slots for this frame.
    ///
    /// Valid until the next mapping pass begins.
    pub fn visible_blocks(&self) -> &[u32] {
        let len = self.visible_count();
        // Compaction has quiesced by the time consumers read this; the
        // atomic cells are plain u32 once the phase barrier has passed.
        unsafe { std::slice::from_raw_parts(self.visible_slots.as_ptr() as *const u32, len) }
    }

    /// Entry indices paired with [`Self::visible_blocks`], used where the
    /// block coordinate is needed alongside the slot.
    pub fn visible_entry_indices(&self) -> &[u32] {
        let len = self.visible_count();
        unsafe { std::slice::from_raw_parts(self.visible_entries.as_ptr() as *const u32, len) }
    }

    /// Heap occupancy snapshot.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Drop every block and entry, returning the volume to its
    /// just-constructed state.
    pub fn reset(&self) {
        self.hash.reset();
        self.heap.reset();
        self.visible_len.store(0, Ordering::Release);
        self.frame.store(0, Ordering::Release);
    }

    /// Audit structural invariants (debug builds and tests).
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.hash.check_invariants(&self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.volume.bucket_count = 16;
        config.volume.bucket_size = 4;
        config.volume.block_count = 64;
        config.volume.entry_count = 16 * 4 * 2;
        config
    }

    #[test]
    fn fresh_map_is_empty() {
        // Goal: construction gives a miss on lookup and a full free stack
        let map = VoxelMap::new(&test_config()).unwrap();
        assert_eq!(map.find(BlockCoord::new(0, 0, 0)), None);
        assert_eq!(map.heap_stats().free, 64);
        assert_eq!(map.visible_count(), 0);
    }

    #[test]
    fn boundary_operations_round_trip() {
        let map = VoxelMap::new(&test_config()).unwrap();
        let key = BlockCoord::new(3, -2, 5);
        let slot = map.alloc_if_absent(key).unwrap();
        assert_eq!(map.find(key), Some(slot));
        assert!(map.remove(key));
        assert_eq!(map.find(key), None);
        map.check_invariants().unwrap();
    }

    #[test]
    fn begin_frame_clears_visible_list() {
        let map = VoxelMap::new(&test_config()).unwrap();
        let slot = map.alloc_if_absent(BlockCoord::new(1, 1, 1)).unwrap();
        map.visible_push(slot, 0);
        assert_eq!(map.visible_count(), 1);
        assert_eq!(map.visible_blocks(), &[slot]);

        let frame = map.begin_frame();
        assert_eq!(frame, 1);
        assert_eq!(map.visible_count(), 0);
    }

    #[test]
    fn visible_list_is_dense_under_concurrent_pushes() {
        // Goal: the atomic cursor yields a dense, complete list
        let map = VoxelMap::new(&test_config()).unwrap();
        crossbeam::thread::scope(|s| {
            for t in 0..4u32 {
                let map = &map;
                s.spawn(move |_| {
                    for i in 0..8u32 {
                        map.visible_push(t * 8 + i, (t * 8 + i) as usize);
                    }
                });
            }
        })
        .unwrap();

        let mut slots: Vec<u32> = map.visible_blocks().to_vec();
        slots.sort_unstable();
        assert_eq!(slots, (0..32).collect::<Vec<u32>>());
    }
}

//! Fixed-capacity voxel-block heap with a LIFO free stack
//!
//! The heap owns every voxel block the volume will ever use, allocated once
//! at construction. A free stack of slot indices with an atomic top hands
//! blocks out and takes them back; LIFO order means the most recently freed
//! slot is reused first, which keeps blocks that oscillate between live and
//! dead hot in cache.
//!
//! Phase contract: allocations race only with allocations (mapping phase)
//! and frees race only with frees (recycle phase); the host orders the
//! phases. The stack protocol relies on this.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::error::VolumeError;
use crate::core::types::VoxelBlock;

/// Block storage plus free-list state.
pub struct BlockHeap {
    /// The block pool; mutated through raw pointers by fusion lanes
    blocks: Box<[UnsafeCell<VoxelBlock>]>,

    /// Frame index of each block's last meaningful update
    last_update: Box<[AtomicU32]>,

    /// Per-block decay counters consumed by the recycler
    decay: Box<[AtomicU32]>,

    /// Stack of free slot indices; `free[0..free_top)` are valid
    free: Box<[AtomicU32]>,

    /// Number of free slots; also the stack top
    free_top: AtomicU32,

    /// Value decay counters are seeded with on reclamation
    decay_seed: u32,
}

impl BlockHeap {
    /// Create a heap of `capacity` zeroed blocks, all free.
    ///
    /// `decay_seed` is the recycler's initial decay value, normally the
    /// configured weight upper bound.
    pub fn new(capacity: u32, decay_seed: u32) -> Self {
        let n = capacity as usize;
        let heap = Self {
            blocks: (0..n).map(|_| UnsafeCell::new(VoxelBlock::empty())).collect(),
            last_update: (0..n).map(|_| AtomicU32::new(0)).collect(),
            decay: (0..n).map(|_| AtomicU32::new(decay_seed)).collect(),
            free: (0..n).map(|_| AtomicU32::new(0)).collect(),
            free_top: AtomicU32::new(0),
            decay_seed,
        };
        heap.reset();
        heap
    }

    /// Total number of blocks in the pool.
    pub fn capacity(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Current number of free slots.
    pub fn free_count(&self) -> u32 {
        self.free_top.load(Ordering::Acquire)
    }

    /// Pop a free slot off the stack.
    ///
    /// Many lanes call this concurrently during allocation; each winner of
    /// the top CAS owns a distinct stack index, so no slot is handed out
    /// twice.
    pub fn alloc(&self) -> Result<u32, VolumeError> {
        loop {
            let top = self.free_top.load(Ordering::Acquire);
            if top == 0 {
                return Err(VolumeError::HeapExhausted);
            }
            if self
                .free_top
                .compare_exchange_weak(top, top - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(self.free[(top - 1) as usize].load(Ordering::Acquire));
            }
        }
    }

    /// Push a slot back onto the stack and scrub its block.
    ///
    /// The top is advanced before the slot index is written: the claimed
    /// stack cell belongs to this lane alone, so a concurrent `free` can
    /// never publish into the same cell.
    pub fn free(&self, slot: u32) {
        debug_assert!(slot < self.capacity());

        // Scrub now so the next alloc hands out a pristine block.
        unsafe {
            *self.blocks[slot as usize].get() = VoxelBlock::empty();
        }
        self.last_update[slot as usize].store(0, Ordering::Relaxed);
        self.decay[slot as usize].store(self.decay_seed, Ordering::Relaxed);

        let top = self.free_top.fetch_add(1, Ordering::AcqRel);
        debug_assert!(top < self.capacity());
        self.free[top as usize].store(slot, Ordering::Release);
    }

    /// Return every slot to the free stack and scrub all metadata.
    ///
    /// After reset the stack holds `{0, .., capacity-1}` with the highest
    /// slot on top, so pops descend from `capacity - 1`.
    pub fn reset(&self) {
        let n = self.capacity();
        for i in 0..n {
            self.free[i as usize].store(i, Ordering::Relaxed);
            self.last_update[i as usize].store(0, Ordering::Relaxed);
            self.decay[i as usize].store(self.decay_seed, Ordering::Relaxed);
            unsafe {
                *self.blocks[i as usize].get() = VoxelBlock::empty();
            }
        }
        self.free_top.store(n, Ordering::Release);
    }

    /// Shared read access to a block.
    ///
    /// Valid only while the owning entry is live and no fusion lane is
    /// writing the same block; the per-frame phase ordering guarantees
    /// both for collaborators reading between `Mapping` and `Recycle`.
    pub fn block(&self, slot: u32) -> &VoxelBlock {
        unsafe { &*self.blocks[slot as usize].get() }
    }

    /// Raw write access to a block for fusion lanes.
    ///
    /// Each visible block is handed to exactly one lane per frame, so
    /// writes through this pointer never alias.
    pub fn block_ptr(&self, slot: u32) -> *mut VoxelBlock {
        self.blocks[slot as usize].get()
    }

    /// Raw pointer to the whole block array, for external collaborators
    /// (meshing, ray casting) that index it themselves.
    pub fn blocks_ptr(&self) -> *mut VoxelBlock {
        self.blocks.as_ptr() as *mut VoxelBlock
    }

    /// Stamp a block as meaningfully updated in `frame`.
    pub fn touch(&self, slot: u32, frame: u32) {
        self.last_update[slot as usize].store(frame, Ordering::Release);
    }

    /// Frame index of the block's last meaningful update.
    pub fn last_update(&self, slot: u32) -> u32 {
        self.last_update[slot as usize].load(Ordering::Acquire)
    }

    /// Current decay counter of a block.
    pub fn decay(&self, slot: u32) -> u32 {
        self.decay[slot as usize].load(Ordering::Acquire)
    }

    /// Decrement a block's decay counter toward zero.
    pub fn decay_decrement(&self, slot: u32) -> u32 {
        let d = self.decay[slot as usize].load(Ordering::Acquire);
        let next = d.saturating_sub(1);
        self.decay[slot as usize].store(next, Ordering::Release);
        next
    }

    /// Reset a block's decay counter to the seed value.
    pub fn decay_reset(&self, slot: u32) {
        self.decay[slot as usize].store(self.decay_seed, Ordering::Release);
    }

    /// Copy of the current free stack contents, bottom to top.
    ///
    /// Quiescent use only (tests and invariant audits).
    pub fn free_snapshot(&self) -> Vec<u32> {
        let top = self.free_count() as usize;
        (0..top).map(|i| self.free[i].load(Ordering::Acquire)).collect()
    }

    /// Snapshot of heap occupancy.
    pub fn stats(&self) -> HeapStats {
        let free = self.free_count();
        HeapStats {
            capacity: self.capacity(),
            free,
            live: self.capacity() - free,
        }
    }
}

/// Occupancy snapshot of the block heap
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    /// Total block capacity
    pub capacity: u32,
    /// Slots currently on the free stack
    pub free: u32,
    /// Slots currently owned by live hash entries
    pub live: u32,
}

// Safety: all shared mutation goes through atomics or through block
// pointers whose aliasing is excluded by the per-frame phase ordering.
unsafe impl Send for BlockHeap {}
unsafe impl Sync for BlockHeap {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn fresh_heap_pops_descending_from_top() {
        // Goal: first allocation on a 64-block heap yields slot 63
        let heap = BlockHeap::new(64, 255);
        assert_eq!(heap.free_count(), 64);
        assert_eq!(heap.alloc().unwrap(), 63);
        assert_eq!(heap.free_count(), 63);
        assert_eq!(heap.alloc().unwrap(), 62);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        // Goal: LIFO reuse
        let heap = BlockHeap::new(8, 255);
        let a = heap.alloc().unwrap();
        let _b = heap.alloc().unwrap();
        heap.free(a);
        assert_eq!(heap.alloc().unwrap(), a);
    }

    #[test]
    fn exhaustion_is_reported_not_fatal() {
        let heap = BlockHeap::new(2, 255);
        heap.alloc().unwrap();
        heap.alloc().unwrap();
        assert_eq!(heap.alloc(), Err(VolumeError::HeapExhausted));
        // Still usable after a free
        heap.free(1);
        assert_eq!(heap.alloc().unwrap(), 1);
    }

    #[test]
    fn freeing_scrubs_the_block() {
        let heap = BlockHeap::new(4, 255);
        let slot = heap.alloc().unwrap();
        unsafe {
            (*heap.block_ptr(slot)).voxels[0].sdf = 1.5;
        }
        heap.touch(slot, 7);
        heap.free(slot);
        let again = heap.alloc().unwrap();
        assert_eq!(again, slot);
        assert_eq!(heap.block(again).voxels[0].sdf, 0.0);
        assert_eq!(heap.last_update(again), 0);
        assert_eq!(heap.decay(again), 255);
    }

    #[test]
    fn concurrent_allocs_hand_out_distinct_slots() {
        // Goal: racing lanes never receive the same slot
        let heap = BlockHeap::new(256, 255);
        let mut all = Vec::new();
        crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|_| {
                        let mut got = Vec::new();
                        for _ in 0..32 {
                            got.push(heap.alloc().unwrap());
                        }
                        got
                    })
                })
                .collect();
            for h in handles {
                all.extend(h.join().unwrap());
            }
        })
        .unwrap();

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 256);
        assert_eq!(heap.free_count(), 0);
    }

    #[test]
    fn reset_restores_full_capacity() {
        let heap = BlockHeap::new(16, 255);
        for _ in 0..10 {
            heap.alloc().unwrap();
        }
        heap.reset();
        assert_eq!(heap.free_count(), 16);
        assert_eq!(heap.alloc().unwrap(), 15);
    }

    #[test]
    fn decay_saturates_at_zero() {
        let heap = BlockHeap::new(2, 2);
        let slot = heap.alloc().unwrap();
        assert_eq!(heap.decay_decrement(slot), 1);
        assert_eq!(heap.decay_decrement(slot), 0);
        assert_eq!(heap.decay_decrement(slot), 0);
        heap.decay_reset(slot);
        assert_eq!(heap.decay(slot), 2);
    }
}

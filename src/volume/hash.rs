//! Open-addressed, bucket-chained hash map from block coordinates to heap
//! slots
//!
//! Entries live in one flat array. Each bucket owns a contiguous run of
//! `bucket_size` entries; insertions that find the run full claim an entry
//! from the overflow region and splice it into the bucket's chain via
//! signed `next` offsets. The slot word of every entry is a single CAS-able
//! `i32` carrying the `FREE / LOCK / occupied` wire encoding, which is what
//! makes thousands of lanes able to race `alloc_if_absent` without a lock
//! in the common path.
//!
//! Phase contract: `remove` never runs concurrently with `alloc_if_absent`
//! (the host orders mapping before recycling). Removal and overflow
//! splicing serialize on a per-bucket mutex word.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::constants::{
    FREE_ENTRY, HASH_PRIME_X, HASH_PRIME_Y, HASH_PRIME_Z, LOCK_ENTRY, NO_OFFSET,
};
use crate::core::error::VolumeError;
use crate::core::types::{BlockCoord, EntrySlot};
use crate::volume::heap::BlockHeap;

/// The frozen 3-prime mixing hash.
///
/// Part of the wire contract: recycled state is re-hashed on reset, so the
/// constants and the mixing shape must never change.
#[inline]
pub fn hash_bucket(coord: BlockCoord, bucket_count: u32) -> u32 {
    let mixed = (coord.x.wrapping_mul(HASH_PRIME_X)
        ^ coord.y.wrapping_mul(HASH_PRIME_Y)
        ^ coord.z.wrapping_mul(HASH_PRIME_Z)) as u32;
    mixed % bucket_count
}

/// Outcome of scanning a bucket for an insertion point.
enum Scan {
    /// Lowest-index free entry available for reservation
    Free(usize),
    /// An insertion is mid-publication somewhere in the bucket; retry
    InFlight,
    /// Primary region and chain are fully occupied
    Full,
}

/// The sparse volume's block index.
pub struct BlockHashTable {
    bucket_count: u32,
    bucket_size: u32,
    entry_count: u32,

    /// Per-entry key words; valid only while the slot word is occupied
    keys: Box<[[AtomicI32; 3]]>,

    /// Per-entry slot words in the `-2 / -1 / ≥ 0` wire encoding
    slots: Box<[AtomicI32]>,

    /// Per-entry chain links as signed offsets; `NO_OFFSET` terminates
    links: Box<[AtomicI32]>,

    /// Per-bucket mutex words guarding chain surgery
    bucket_locks: Box<[AtomicU32]>,

    /// Free stack over the overflow region
    excess_free: Box<[AtomicU32]>,
    excess_top: AtomicU32,
}

impl BlockHashTable {
    /// Create a table with `bucket_count · bucket_size` primary entries and
    /// the remainder of `entry_count` as the overflow pool.
    ///
    /// `entry_count` must leave room for overflow; the configuration layer
    /// enforces a factor of two.
    pub fn new(bucket_count: u32, bucket_size: u32, entry_count: u32) -> Self {
        let primary = bucket_count as usize * bucket_size as usize;
        assert!(entry_count as usize > primary, "no overflow headroom");
        let excess = entry_count as usize - primary;

        let table = Self {
            bucket_count,
            bucket_size,
            entry_count,
            keys: (0..entry_count)
                .map(|_| [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)])
                .collect(),
            slots: (0..entry_count).map(|_| AtomicI32::new(FREE_ENTRY)).collect(),
            links: (0..entry_count).map(|_| AtomicI32::new(NO_OFFSET)).collect(),
            bucket_locks: (0..bucket_count).map(|_| AtomicU32::new(0)).collect(),
            excess_free: (0..excess).map(|_| AtomicU32::new(0)).collect(),
            excess_top: AtomicU32::new(0),
        };
        table.reset();
        table
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Entries per bucket.
    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    /// Total entries, primary plus overflow.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Decoded slot word of an entry.
    pub fn entry_slot(&self, idx: usize) -> EntrySlot {
        EntrySlot::from_wire(self.slots[idx].load(Ordering::Acquire))
    }

    /// Key of an entry; meaningful only while the entry is occupied.
    pub fn entry_key(&self, idx: usize) -> BlockCoord {
        let k = &self.keys[idx];
        BlockCoord::new(
            k[0].load(Ordering::Relaxed),
            k[1].load(Ordering::Relaxed),
            k[2].load(Ordering::Relaxed),
        )
    }

    /// Number of occupied entries (full scan).
    pub fn live_entries(&self) -> usize {
        (0..self.entry_count as usize)
            .filter(|&i| self.entry_slot(i).is_occupied())
            .count()
    }

    /// Free entries remaining in the overflow pool.
    pub fn excess_free_count(&self) -> u32 {
        self.excess_top.load(Ordering::Acquire)
    }

    /// Look up the heap slot stored for `coord`.
    ///
    /// Scans the bucket's primary run, then walks the head's chain. A miss
    /// is a value, not an error.
    pub fn find(&self, coord: BlockCoord) -> Option<u32> {
        let base = self.bucket_base(coord);
        for i in 0..self.bucket_size as usize {
            if let Some(slot) = self.match_at(base + i, coord) {
                return Some(slot);
            }
        }

        let mut idx = base;
        for _ in 0..self.entry_count {
            let off = self.links[idx].load(Ordering::Acquire);
            if off == NO_OFFSET {
                return None;
            }
            idx = self.advance(idx, off);
            if let Some(slot) = self.match_at(idx, coord) {
                return Some(slot);
            }
        }
        debug_assert!(false, "hash chain cycle at bucket base {}", base);
        None
    }

    /// Insert `coord` if absent, allocating a heap slot for it; return the
    /// slot either way.
    ///
    /// Safe to call from any number of racing lanes with duplicate keys:
    /// exactly one lane wins the `FREE → LOCK` reservation CAS on the
    /// lowest free entry, allocates exactly one heap slot, and publishes
    /// key-then-slot; every loser re-runs the lookup and returns the
    /// winner's slot.
    pub fn alloc_if_absent(
        &self,
        coord: BlockCoord,
        heap: &BlockHeap,
    ) -> Result<u32, VolumeError> {
        loop {
            if let Some(slot) = self.find(coord) {
                return Ok(slot);
            }

            match self.scan_for_free(coord) {
                Scan::Free(idx) => {
                    if self.slots[idx]
                        .compare_exchange(
                            FREE_ENTRY,
                            LOCK_ENTRY,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        let slot = match heap.alloc() {
                            Ok(s) => s,
                            Err(e) => {
                                // Roll the reservation back; the frame
                                // absorbs the miss.
                                self.slots[idx].store(FREE_ENTRY, Ordering::Release);
                                return Err(e);
                            }
                        };
                        self.write_key(idx, coord);
                        self.slots[idx].store(slot as i32, Ordering::Release);
                        return Ok(slot);
                    }
                    // Lost the reservation; the winner may hold our key.
                    std::hint::spin_loop();
                }
                Scan::InFlight => {
                    // Some lane is between reservation and publication; it
                    // may be inserting this very key, so looking for another
                    // free entry now could double-insert. Retry the lookup.
                    std::hint::spin_loop();
                }
                Scan::Full => return self.insert_overflow(coord, heap),
            }
        }
    }

    /// Remove `coord` from the table, returning its heap slot to the free
    /// stack. Returns `false` if the key is not present.
    pub fn remove(&self, coord: BlockCoord, heap: &BlockHeap) -> bool {
        let bucket = hash_bucket(coord, self.bucket_count);
        let base = (bucket * self.bucket_size) as usize;
        self.lock_bucket(bucket);

        // Primary region: free in place. The head's chain stays intact so
        // lookups keep routing through it.
        for i in 0..self.bucket_size as usize {
            let idx = base + i;
            if let Some(slot) = self.match_at(idx, coord) {
                self.slots[idx].store(FREE_ENTRY, Ordering::Release);
                self.write_key(idx, BlockCoord::default());
                heap.free(slot);
                self.unlock_bucket(bucket);
                return true;
            }
        }

        // Overflow chain: unlink and recycle the entry.
        let mut prev = base;
        let mut off = self.links[prev].load(Ordering::Acquire);
        let mut walked = 0;
        while off != NO_OFFSET && walked < self.entry_count {
            let idx = self.advance(prev, off);
            if let Some(slot) = self.match_at(idx, coord) {
                let next = self.links[idx].load(Ordering::Acquire);
                let bridged = if next == NO_OFFSET {
                    NO_OFFSET
                } else {
                    Self::offset_between(prev, self.advance(idx, next))
                };
                self.links[prev].store(bridged, Ordering::Release);

                self.slots[idx].store(FREE_ENTRY, Ordering::Release);
                self.write_key(idx, BlockCoord::default());
                self.links[idx].store(NO_OFFSET, Ordering::Release);
                self.excess_push(idx);
                heap.free(slot);
                self.unlock_bucket(bucket);
                return true;
            }
            prev = idx;
            off = self.links[prev].load(Ordering::Acquire);
            walked += 1;
        }
        debug_assert!(walked < self.entry_count, "hash chain cycle in remove");

        self.unlock_bucket(bucket);
        false
    }

    /// Clear every entry and refill the overflow free stack.
    pub fn reset(&self) {
        for i in 0..self.entry_count as usize {
            self.slots[i].store(FREE_ENTRY, Ordering::Relaxed);
            self.links[i].store(NO_OFFSET, Ordering::Relaxed);
            self.write_key(i, BlockCoord::default());
        }
        for b in 0..self.bucket_count as usize {
            self.bucket_locks[b].store(0, Ordering::Relaxed);
        }
        let primary = self.bucket_count * self.bucket_size;
        let excess = self.entry_count - primary;
        for i in 0..excess {
            self.excess_free[i as usize].store(primary + i, Ordering::Relaxed);
        }
        self.excess_top.store(excess, Ordering::Release);
    }

    /// Audit the structural invariants; returns a description of the first
    /// violation found. Used by tests and debug builds after recycling.
    pub fn check_invariants(&self, heap: &BlockHeap) -> Result<(), String> {
        use std::collections::HashSet;

        let mut owned = HashSet::new();
        let mut keys = HashSet::new();
        for i in 0..self.entry_count as usize {
            if let EntrySlot::Occupied(slot) = self.entry_slot(i) {
                if !owned.insert(slot) {
                    return Err(format!("heap slot {} owned by more than one entry", slot));
                }
                let key = self.entry_key(i);
                if !keys.insert(key) {
                    return Err(format!("key {} appears in more than one entry", key));
                }
                let expected = hash_bucket(key, self.bucket_count);
                let actual = i as u32 / self.bucket_size;
                let in_primary = (i as u32) < self.bucket_count * self.bucket_size;
                if in_primary && actual != expected {
                    return Err(format!("key {} stored in bucket {} not {}", key, actual, expected));
                }
            }
        }

        if heap.free_count() + owned.len() as u32 != heap.capacity() {
            return Err(format!(
                "free stack holds {} but {} slots are live of {}",
                heap.free_count(),
                owned.len(),
                heap.capacity()
            ));
        }
        for slot in heap.free_snapshot() {
            if owned.contains(&slot) {
                return Err(format!("slot {} is both free and live", slot));
            }
        }

        // Chain acyclicity: no next-walk revisits an entry.
        for b in 0..self.bucket_count {
            let base = (b * self.bucket_size) as usize;
            let mut seen = HashSet::new();
            let mut idx = base;
            loop {
                let off = self.links[idx].load(Ordering::Acquire);
                if off == NO_OFFSET {
                    break;
                }
                idx = self.advance(idx, off);
                if !seen.insert(idx) {
                    return Err(format!("cycle in chain of bucket {}", b));
                }
            }
        }

        Ok(())
    }

    #[inline]
    fn bucket_base(&self, coord: BlockCoord) -> usize {
        (hash_bucket(coord, self.bucket_count) * self.bucket_size) as usize
    }

    #[inline]
    fn advance(&self, idx: usize, off: i32) -> usize {
        (idx as i64 + off as i64).rem_euclid(self.entry_count as i64) as usize
    }

    #[inline]
    fn offset_between(from: usize, to: usize) -> i32 {
        (to as i64 - from as i64) as i32
    }

    #[inline]
    fn match_at(&self, idx: usize, coord: BlockCoord) -> Option<u32> {
        let slot = self.slots[idx].load(Ordering::Acquire);
        if slot >= 0 && self.entry_key(idx) == coord {
            Some(slot as u32)
        } else {
            None
        }
    }

    fn write_key(&self, idx: usize, coord: BlockCoord) {
        let k = &self.keys[idx];
        k[0].store(coord.x, Ordering::Relaxed);
        k[1].store(coord.y, Ordering::Relaxed);
        k[2].store(coord.z, Ordering::Relaxed);
    }

    /// Walk the bucket's primary run and chain classifying the insertion
    /// point. The lowest free absolute index wins ties so that racing lanes
    /// converge on the same entry.
    fn scan_for_free(&self, coord: BlockCoord) -> Scan {
        let base = self.bucket_base(coord);
        let mut lowest_free: Option<usize> = None;
        let mut in_flight = false;

        let mut observe = |idx: usize, this: &Self| {
            match this.slots[idx].load(Ordering::Acquire) {
                LOCK_ENTRY => in_flight = true,
                FREE_ENTRY => {
                    if lowest_free.map_or(true, |low| idx < low) {
                        lowest_free = Some(idx);
                    }
                }
                _ => {}
            }
        };

        for i in 0..self.bucket_size as usize {
            observe(base + i, self);
        }
        let mut idx = base;
        for _ in 0..self.entry_count {
            let off = self.links[idx].load(Ordering::Acquire);
            if off == NO_OFFSET {
                break;
            }
            idx = self.advance(idx, off);
            observe(idx, self);
        }

        if in_flight {
            Scan::InFlight
        } else if let Some(idx) = lowest_free {
            Scan::Free(idx)
        } else {
            Scan::Full
        }
    }

    /// Claim an overflow entry and splice it at the front of the bucket's
    /// chain. Serialized per bucket by the mutex word; re-checks the lookup
    /// under the lock so racing lanes with the same key cannot both splice.
    fn insert_overflow(&self, coord: BlockCoord, heap: &BlockHeap) -> Result<u32, VolumeError> {
        let bucket = hash_bucket(coord, self.bucket_count);
        let head = (bucket * self.bucket_size) as usize;
        self.lock_bucket(bucket);

        if let Some(slot) = self.find(coord) {
            self.unlock_bucket(bucket);
            return Ok(slot);
        }

        let entry = match self.excess_pop() {
            Some(e) => e,
            None => {
                self.unlock_bucket(bucket);
                return Err(VolumeError::EntryPoolExhausted);
            }
        };
        let slot = match heap.alloc() {
            Ok(s) => s,
            Err(e) => {
                self.excess_push(entry);
                self.unlock_bucket(bucket);
                return Err(e);
            }
        };

        self.write_key(entry, coord);
        let head_off = self.links[head].load(Ordering::Acquire);
        let inherited = if head_off == NO_OFFSET {
            NO_OFFSET
        } else {
            Self::offset_between(entry, self.advance(head, head_off))
        };
        self.links[entry].store(inherited, Ordering::Relaxed);
        // Publish the slot before the splice: once the head links to this
        // entry, any walker must observe a fully formed entry.
        self.slots[entry].store(slot as i32, Ordering::Release);
        self.links[head].store(Self::offset_between(head, entry), Ordering::Release);

        self.unlock_bucket(bucket);
        Ok(slot)
    }

    fn excess_pop(&self) -> Option<usize> {
        loop {
            let top = self.excess_top.load(Ordering::Acquire);
            if top == 0 {
                return None;
            }
            if self
                .excess_top
                .compare_exchange_weak(top, top - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(self.excess_free[(top - 1) as usize].load(Ordering::Acquire) as usize);
            }
        }
    }

    fn excess_push(&self, entry: usize) {
        let top = self.excess_top.fetch_add(1, Ordering::AcqRel);
        self.excess_free[top as usize].store(entry as u32, Ordering::Release);
    }

    fn lock_bucket(&self, bucket: u32) {
        let word = &self.bucket_locks[bucket as usize];
        while word
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock_bucket(&self, bucket: u32) {
        self.bucket_locks[bucket as usize].store(0, Ordering::Release);
    }
}

// Safety: every shared word is an atomic; key words are only trusted after
// an acquire load of the owning slot word observes publication.
unsafe impl Send for BlockHashTable {}
unsafe impl Sync for BlockHashTable {}

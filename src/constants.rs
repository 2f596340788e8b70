//! Global constants used throughout the voxel-hash codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Side length of a voxel block, in voxels.
///
/// Hard-coded rather than configurable: the block side feeds shift/mask
/// arithmetic in every kernel-style loop, and 8 keeps a block (512 voxels,
/// 6 KB) inside a comfortable cache footprint.
pub const BLOCK_SIDE_LENGTH: i32 = 8;

/// Number of voxels in one block (`BLOCK_SIDE_LENGTH³`).
pub const BLOCK_VOLUME: usize = 512;

/// Default number of hash entries per bucket.
///
/// A bucket is a contiguous run of entries; at low load factor a lookup is
/// a single coalesced read of this many entries.
pub const DEFAULT_BUCKET_SIZE: u32 = 10;

/// Slot sentinel: the entry is unoccupied and may be claimed.
pub const FREE_ENTRY: i32 = -2;

/// Slot sentinel: an inserting lane has reserved the entry but not yet
/// published its key and heap slot.
pub const LOCK_ENTRY: i32 = -1;

/// Link sentinel: terminates an overflow chain.
///
/// `next` fields are signed offsets relative to the current entry, so zero
/// (an entry linking to itself) is never a valid link.
pub const NO_OFFSET: i32 = 0;

/// First prime of the frozen 3-prime mixing hash.
///
/// The hash function is part of the wire contract: recycled state is
/// re-hashed on reset, so these constants must never change.
pub const HASH_PRIME_X: i32 = 73_856_093;

/// Second prime of the frozen 3-prime mixing hash.
pub const HASH_PRIME_Y: i32 = 19_349_669;

/// Third prime of the frozen 3-prime mixing hash.
pub const HASH_PRIME_Z: i32 = 83_492_791;

/// Fraction the normalized device cube is shrunk by for frustum tests.
///
/// Testing against a 95 % cube keeps blocks that graze the frustum boundary
/// inside the visible set, so fusion near the image border stays continuous.
pub const FRUSTUM_SHRINK: f32 = 0.95;

/// Default number of shards the recycler sweep divides the entry array
/// into. One shard is swept per frame, amortizing the full-table scan.
pub const DEFAULT_RECYCLER_SHARDS: u32 = 16;

/// Default number of frames a block may go untouched before it becomes
/// eligible for reclamation.
pub const DEFAULT_MAX_IDLE_FRAMES: u32 = 30;

/// Default weight threshold below which a voxel is considered unobserved.
pub const DEFAULT_WEIGHT_EPSILON: f32 = 1e-3;

//! The sparse voxel volume: block heap, hash index, and map facade
//!
//! This is the core of the system. The heap owns block storage, the hash
//! table maps block coordinates to heap slots from thousands of concurrent
//! lanes, and [`VoxelMap`] ties them together behind the boundary the rest of the
//! pipeline (and external collaborators) consume.

/// Open-addressed concurrent hash table over block coordinates
pub mod hash;
/// Fixed-capacity block heap with LIFO free stack
pub mod heap;
/// Facade combining heap, hash, and the per-frame visible list
pub mod map;

pub use hash::{hash_bucket, BlockHashTable};
pub use heap::{BlockHeap, HeapStats};
pub use map::VoxelMap;

//! Core data types for the sparse voxel volume
//!
//! This module contains the plain-old-data types shared by every stage of
//! the pipeline: block coordinates, voxels, voxel blocks, the hash entry
//! slot encoding, and the by-value parameter structs handed to parallel
//! stages.

use bytemuck::{Pod, Zeroable};
use glam::IVec3;
use std::fmt;

use crate::constants::{BLOCK_VOLUME, FREE_ENTRY, LOCK_ENTRY};

/// Integer coordinate of one voxel block in the infinite lattice.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BlockCoord {
    /// Block index along x
    pub x: i32,
    /// Block index along y
    pub y: i32,
    /// Block index along z
    pub z: i32,
}

impl BlockCoord {
    /// Create a block coordinate from its components.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl From<IVec3> for BlockCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<BlockCoord> for IVec3 {
    fn from(b: BlockCoord) -> Self {
        IVec3::new(b.x, b.y, b.z)
    }
}

impl fmt::Display for BlockCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One voxel of the truncated signed distance field.
///
/// 12 bytes, `repr(C)` with no implicit padding so whole blocks can be
/// treated as raw byte buffers by collaborators.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Voxel {
    /// Signed distance to the nearest observed surface, meters
    pub sdf: f32,
    /// Accumulated observation weight
    pub weight: f32,
    /// Blended surface color
    pub color: [u8; 3],
    _pad: u8,
}

impl Voxel {
    /// A voxel with explicit field values.
    pub fn new(sdf: f32, weight: f32, color: [u8; 3]) -> Self {
        Self { sdf, weight, color, _pad: 0 }
    }
}

/// A contiguous cube of `8³ = 512` voxels, the unit of allocation.
///
/// Voxels are stored z-major: `idx = z·64 + y·8 + x`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct VoxelBlock {
    /// The block's voxels in z-major order
    pub voxels: [Voxel; BLOCK_VOLUME],
}

impl VoxelBlock {
    /// An all-zero block (sdf 0, weight 0, black).
    pub fn empty() -> Self {
        Zeroable::zeroed()
    }
}

impl Default for VoxelBlock {
    fn default() -> Self {
        Self::empty()
    }
}

/// Decoded view of a hash entry's 32-bit slot word.
///
/// On the wire the slot is a single CAS-able `i32`: `-2` free, `-1`
/// reserved by an in-flight insertion, `≥ 0` a heap slot index. This enum
/// is the typed surface over that encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntrySlot {
    /// The entry is unoccupied
    Free,
    /// An inserting lane holds the entry but has not published it yet
    Locked,
    /// The entry owns the given heap slot
    Occupied(u32),
}

impl EntrySlot {
    /// Decode the wire encoding.
    pub fn from_wire(word: i32) -> Self {
        match word {
            FREE_ENTRY => Self::Free,
            LOCK_ENTRY => Self::Locked,
            slot => Self::Occupied(slot as u32),
        }
    }

    /// Encode back to the wire form.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Free => FREE_ENTRY,
            Self::Locked => LOCK_ENTRY,
            Self::Occupied(slot) => slot as i32,
        }
    }

    /// Whether the entry currently owns a heap slot.
    pub fn is_occupied(self) -> bool {
        matches!(self, Self::Occupied(_))
    }
}

/// Volume parameters handed by value to every parallel stage.
///
/// These travel with the work instead of living in process-wide state, so
/// no stage reads global mutable configuration.
#[derive(Clone, Copy, Debug)]
pub struct VolumeParams {
    /// Edge length of one voxel, meters
    pub voxel_size: f32,
    /// Base truncation distance, meters
    pub truncation_distance: f32,
    /// Depth-proportional truncation growth
    pub truncation_distance_scale: f32,
    /// Weight contributed by a single depth sample
    pub weight_sample: f32,
    /// Saturation bound for accumulated weights
    pub weight_upper_bound: f32,
    /// Clamp for stored signed distances, meters
    pub sdf_upper_bound: f32,
}

impl VolumeParams {
    /// Truncation band half-width at camera depth `z`.
    #[inline]
    pub fn truncate_distance(&self, z: f32) -> f32 {
        self.truncation_distance + self.truncation_distance_scale * z
    }
}

/// Pinhole sensor parameters handed by value to every parallel stage.
#[derive(Clone, Copy, Debug)]
pub struct SensorParams {
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

impl SensorParams {
    /// Whether a depth measurement falls inside the trusted range.
    #[inline]
    pub fn depth_valid(&self, d: f32) -> bool {
        d.is_finite() && d >= self.min_depth && d <= self.max_depth
    }
}

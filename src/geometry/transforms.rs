//! Transforms between world, voxel, and block coordinate systems
//!
//! Semantic: A pos to B pos, with A and B in {world, voxel, block}. All
//! functions are pure and total. Floating point is only used where a
//! continuous position is involved; lattice-to-lattice maps are exact
//! integer arithmetic.

use glam::{IVec3, UVec3, Vec3};

use crate::constants::{BLOCK_SIDE_LENGTH, BLOCK_VOLUME};
use crate::core::types::BlockCoord;

/// World position to the voxel containing it.
///
/// `v = floor(p/s + 0.5·sign(p))` per component, so a point epsilon below
/// `-0.5·s` lands in voxel `-1`, not voxel `0`.
#[inline]
pub fn world_to_voxel(world: Vec3, voxel_size: f32) -> IVec3 {
    let p = world / voxel_size;
    IVec3::new(
        (p.x + 0.5 * sign(p.x)).floor() as i32,
        (p.y + 0.5 * sign(p.y)).floor() as i32,
        (p.z + 0.5 * sign(p.z)).floor() as i32,
    )
}

/// Voxel coordinate to its world position (the voxel's lattice point).
#[inline]
pub fn voxel_to_world(voxel: IVec3, voxel_size: f32) -> Vec3 {
    voxel.as_vec3() * voxel_size
}

/// Voxel coordinate to the block containing it.
///
/// Floor-division semantics: negative components are biased by `L-1` before
/// integer division so block `B` always covers voxels `[B·L, (B+1)·L)`.
#[inline]
pub fn voxel_to_block(voxel: IVec3) -> BlockCoord {
    let bias = |c: i32| {
        let c = if c < 0 { c - (BLOCK_SIDE_LENGTH - 1) } else { c };
        c / BLOCK_SIDE_LENGTH
    };
    BlockCoord::new(bias(voxel.x), bias(voxel.y), bias(voxel.z))
}

/// Block coordinate to its corner voxel (smallest x, y, z).
#[inline]
pub fn block_to_voxel(block: BlockCoord) -> IVec3 {
    IVec3::from(block) * BLOCK_SIDE_LENGTH
}

/// Block coordinate to the world position of its corner voxel.
#[inline]
pub fn block_to_world(block: BlockCoord, voxel_size: f32) -> Vec3 {
    voxel_to_world(block_to_voxel(block), voxel_size)
}

/// World position to the block containing it.
#[inline]
pub fn world_to_block(world: Vec3, voxel_size: f32) -> BlockCoord {
    voxel_to_block(world_to_voxel(world, voxel_size))
}

/// World position of a block's center.
///
/// The center sits half a voxel short of the geometric middle because a
/// block spans `L` voxels whose lattice points span `L-1` steps.
#[inline]
pub fn block_center(block: BlockCoord, voxel_size: f32) -> Vec3 {
    block_to_world(block, voxel_size)
        + Vec3::splat(0.5 * voxel_size * (BLOCK_SIDE_LENGTH as f32 - 1.0))
}

/// Local voxel position within a block to its linear index, z-major.
#[inline]
pub fn voxel_local_to_idx(local: UVec3) -> usize {
    let l = BLOCK_SIDE_LENGTH as u32;
    (local.z * l * l + local.y * l + local.x) as usize
}

/// Linear index within a block back to the local voxel position.
#[inline]
pub fn idx_to_voxel_local(idx: usize) -> UVec3 {
    let l = BLOCK_SIDE_LENGTH as usize;
    debug_assert!(idx < BLOCK_VOLUME);
    UVec3::new(
        (idx % l) as u32,
        ((idx % (l * l)) / l) as u32,
        (idx / (l * l)) as u32,
    )
}

/// Global voxel coordinate to its local position within its block.
#[inline]
pub fn voxel_to_local(voxel: IVec3) -> UVec3 {
    let wrap = |c: i32| {
        let r = c % BLOCK_SIDE_LENGTH;
        (if r < 0 { r + BLOCK_SIDE_LENGTH } else { r }) as u32
    };
    UVec3::new(wrap(voxel.x), wrap(voxel.y), wrap(voxel.z))
}

/// Global voxel coordinate to its linear index within its block.
#[inline]
pub fn voxel_to_idx(voxel: IVec3) -> usize {
    voxel_local_to_idx(voxel_to_local(voxel))
}

#[inline]
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const S: f32 = 0.004;

    #[test]
    fn negative_voxelization_rounds_down() {
        // Goal: a point just below -s/2 belongs to voxel -1, not voxel 0
        let eps = 1e-4 * S;
        let v = world_to_voxel(Vec3::splat(-0.5 * S + eps), S);
        assert_eq!(v, IVec3::splat(-1));
    }

    #[test]
    fn origin_maps_to_voxel_zero() {
        assert_eq!(world_to_voxel(Vec3::ZERO, S), IVec3::ZERO);
    }

    #[test]
    fn block_intervals_hold_for_negatives() {
        // Goal: block B covers voxels [B*8, (B+1)*8) on both sides of zero
        assert_eq!(voxel_to_block(IVec3::new(-1, -8, -9)), BlockCoord::new(-1, -1, -2));
        assert_eq!(voxel_to_block(IVec3::new(0, 7, 8)), BlockCoord::new(0, 0, 1));
    }

    #[test]
    fn local_index_is_z_major() {
        assert_eq!(voxel_local_to_idx(UVec3::new(1, 2, 3)), 3 * 64 + 2 * 8 + 1);
        assert_eq!(idx_to_voxel_local(3 * 64 + 2 * 8 + 1), UVec3::new(1, 2, 3));
    }

    #[test]
    fn global_voxel_wraps_into_block() {
        assert_eq!(voxel_to_local(IVec3::new(-1, -8, 9)), UVec3::new(7, 0, 1));
    }

    proptest! {
        #[test]
        fn block_round_trip(bx in -1000i32..1000, by in -1000i32..1000, bz in -1000i32..1000) {
            // Goal: half a voxel into a block's corner always maps back to it
            let block = BlockCoord::new(bx, by, bz);
            let probe = block_to_world(block, S) + Vec3::splat(0.5 * S);
            prop_assert_eq!(world_to_block(probe, S), block);
        }

        #[test]
        fn local_index_round_trip(x in 0u32..8, y in 0u32..8, z in 0u32..8) {
            let local = UVec3::new(x, y, z);
            prop_assert_eq!(idx_to_voxel_local(voxel_local_to_idx(local)), local);
        }

        #[test]
        fn every_voxel_lands_in_its_block(vx in -10_000i32..10_000, vy in -10_000i32..10_000, vz in -10_000i32..10_000) {
            let v = IVec3::new(vx, vy, vz);
            let b = voxel_to_block(v);
            let corner = block_to_voxel(b);
            prop_assert!(v.x >= corner.x && v.x < corner.x + 8);
            prop_assert!(v.y >= corner.y && v.y < corner.y + 8);
            prop_assert!(v.z >= corner.z && v.z < corner.z + 8);
        }
    }
}

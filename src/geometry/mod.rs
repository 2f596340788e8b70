//! Pure geometric utilities
//!
//! Transformations between world, voxel, block and image coordinate
//! systems, plus projection and viewing-frustum determination. Nothing in
//! this module allocates or fails.

/// Camera projection, reprojection, and frustum tests
pub mod camera;
/// Lattice transforms between world, voxel, and block frames
pub mod transforms;

pub use camera::{
    denormalize_depth, is_block_in_frustum, is_point_in_frustum, normalize_depth, project,
    project_to_pixel, reproject,
};
pub use transforms::{
    block_center, block_to_voxel, block_to_world, idx_to_voxel_local, voxel_local_to_idx,
    voxel_to_block, voxel_to_idx, voxel_to_local, voxel_to_world, world_to_block, world_to_voxel,
};

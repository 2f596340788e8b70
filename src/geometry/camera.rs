//! Projection, reprojection and viewing-frustum determination
//!
//! Maps between the camera coordinate system and the image plane, plus the
//! frustum tests the streaming controller uses to decide which blocks are
//! visible. All functions are pure and total.

use glam::{IVec2, Mat4, Vec2, Vec3};

use crate::constants::FRUSTUM_SHRINK;
use crate::core::types::{BlockCoord, SensorParams};
use crate::geometry::transforms::block_center;

/// Project a camera-space point onto the image plane (subpixel).
#[inline]
pub fn project(camera_pos: Vec3, sensor: &SensorParams) -> Vec2 {
    Vec2::new(
        camera_pos.x * sensor.fx / camera_pos.z + sensor.cx,
        camera_pos.y * sensor.fy / camera_pos.z + sensor.cy,
    )
}

/// Project a camera-space point to the nearest integer pixel.
#[inline]
pub fn project_to_pixel(camera_pos: Vec3, sensor: &SensorParams) -> IVec2 {
    let uv = project(camera_pos, sensor) + Vec2::splat(0.5);
    IVec2::new(uv.x.floor() as i32, uv.y.floor() as i32)
}

/// Reproject a pixel at a measured depth back into camera space.
#[inline]
pub fn reproject(u: u32, v: u32, depth: f32, sensor: &SensorParams) -> Vec3 {
    let x = (u as f32 - sensor.cx) / sensor.fx;
    let y = (v as f32 - sensor.cy) / sensor.fy;
    Vec3::new(depth * x, depth * y, depth)
}

/// Map a camera depth into `[0, 1]` over the trusted range.
#[inline]
pub fn normalize_depth(z: f32, min_depth: f32, max_depth: f32) -> f32 {
    (z - min_depth) / (max_depth - min_depth)
}

/// Inverse of [`normalize_depth`].
#[inline]
pub fn denormalize_depth(z: f32, min_depth: f32, max_depth: f32) -> f32 {
    z * (max_depth - min_depth) + min_depth
}

/// Whether a world-space point lies inside the camera frustum.
///
/// The point is projected into a normalized device cube and the cube is
/// shrunk to 95 %, so geometry grazing the boundary still counts as inside.
pub fn is_point_in_frustum(c_t_w: &Mat4, world_pos: Vec3, sensor: &SensorParams) -> bool {
    let camera_pos = c_t_w.transform_point3(world_pos);
    let uv = project(camera_pos, sensor);

    let w = sensor.width as f32;
    let h = sensor.height as f32;
    let ndc = Vec3::new(
        (2.0 * uv.x - (w - 1.0)) / (w - 1.0),
        ((h - 1.0) - 2.0 * uv.y) / (h - 1.0),
        normalize_depth(camera_pos.z, sensor.min_depth, sensor.max_depth),
    ) * FRUSTUM_SHRINK;

    !(ndc.x < -1.0
        || ndc.x > 1.0
        || ndc.y < -1.0
        || ndc.y > 1.0
        || ndc.z < 0.0
        || ndc.z > 1.0)
}

/// Whether a block (tested at its center) lies inside the camera frustum.
pub fn is_block_in_frustum(
    c_t_w: &Mat4,
    block: BlockCoord,
    sensor: &SensorParams,
    voxel_size: f32,
) -> bool {
    is_point_in_frustum(c_t_w, block_center(block, voxel_size), sensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor() -> SensorParams {
        SensorParams {
            fx: 517.306_4,
            fy: 516.469_2,
            cx: 318.643_04,
            cy: 255.313_99,
            width: 640,
            height: 480,
            min_depth: 0.5,
            max_depth: 5.0,
        }
    }

    #[test]
    fn project_reproject_round_trip() {
        // Goal: reprojection inverts projection at the same pixel
        let s = sensor();
        let p = reproject(320, 240, 2.0, &s);
        let uv = project(p, &s);
        assert!((uv.x - 320.0).abs() < 1e-3);
        assert!((uv.y - 240.0).abs() < 1e-3);
    }

    #[test]
    fn depth_normalization_round_trip() {
        let z = 2.75;
        let n = normalize_depth(z, 0.5, 5.0);
        assert!((denormalize_depth(n, 0.5, 5.0) - z).abs() < 1e-6);
        assert!(n > 0.0 && n < 1.0);
    }

    #[test]
    fn center_point_is_in_frustum() {
        let s = sensor();
        let identity = Mat4::IDENTITY;
        assert!(is_point_in_frustum(&identity, Vec3::new(0.0, 0.0, 2.0), &s));
    }

    #[test]
    fn points_outside_depth_range_are_rejected() {
        let s = sensor();
        let identity = Mat4::IDENTITY;
        assert!(!is_point_in_frustum(&identity, Vec3::new(0.0, 0.0, 0.1), &s));
        assert!(!is_point_in_frustum(&identity, Vec3::new(0.0, 0.0, 8.0), &s));
    }

    #[test]
    fn shrink_keeps_grazing_points() {
        // Goal: a point slightly past the exact image edge still passes,
        // because the NDC cube is tested at 95 %
        let s = sensor();
        let identity = Mat4::IDENTITY;
        // Just outside the raw frustum edge in x at depth 2: x/z = cx/fx
        let edge_x = 2.0 * (0.0 - s.cx) / s.fx;
        let p = Vec3::new(edge_x * 1.02, 0.0, 2.0);
        assert!(is_point_in_frustum(&identity, p, &s));
        // Far outside still fails
        let q = Vec3::new(edge_x * 1.5, 0.0, 2.0);
        assert!(!is_point_in_frustum(&identity, q, &s));
    }

    #[test]
    fn block_in_frustum_uses_center() {
        let s = sensor();
        let identity = Mat4::IDENTITY;
        // A block straight ahead at ~2m with 4mm voxels: 2.0 / (0.004*8) ≈ 62
        assert!(is_block_in_frustum(&identity, BlockCoord::new(0, 0, 62), &s, 0.004));
        // A block behind the camera is not visible
        assert!(!is_block_in_frustum(&identity, BlockCoord::new(0, 0, -62), &s, 0.004));
    }
}

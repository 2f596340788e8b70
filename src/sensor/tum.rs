//! TUM RGB-D dataset loader
//!
//! Replays a TUM-format trajectory: `depth.txt` and `rgb.txt` list the
//! per-frame image files, `depth_gt_associations.txt` pairs depth frames
//! with ground-truth poses as translation plus quaternion. Depth images
//! are 16-bit PNGs in units of 1/5000 m.

use glam::{Mat4, Quat, Vec3};
use image::GenericImageView;
use std::path::{Path, PathBuf};

use crate::core::error::DatasetError;
use crate::core::types::SensorParams;
use crate::sensor::frame::SensorFrame;

/// TUM depth PNGs store millimeters scaled by 5.
const DEPTH_SCALE: f32 = 5000.0;

/// A TUM RGB-D sequence on disk.
pub struct TumDataset {
    root: PathBuf,
    depth_files: Vec<PathBuf>,
    color_files: Vec<PathBuf>,
    poses: Vec<Mat4>,
}

impl TumDataset {
    /// Open a sequence directory, parsing the image lists and trajectory.
    ///
    /// The frame count is the shortest of the three lists; trailing
    /// unmatched records are ignored.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref().to_path_buf();
        let depth_files = load_image_list(&root, "depth.txt")?;
        let color_files = load_image_list(&root, "rgb.txt")?;
        let poses = load_trajectory(&root.join("depth_gt_associations.txt"))?;

        Ok(Self { root, depth_files, color_files, poses })
    }

    /// Number of complete frames available.
    pub fn len(&self) -> usize {
        self.depth_files
            .len()
            .min(self.color_files.len())
            .min(self.poses.len())
    }

    /// Whether the sequence has no complete frame.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode frame `index` into a posed RGB-D frame.
    pub fn load_frame(
        &self,
        index: usize,
        sensor: &SensorParams,
    ) -> Result<SensorFrame, DatasetError> {
        let depth_path = self.root.join(&self.depth_files[index]);
        let color_path = self.root.join(&self.color_files[index]);

        let depth_img = image::open(&depth_path)?;
        let (w, h) = depth_img.dimensions();
        if w != sensor.width || h != sensor.height {
            return Err(DatasetError::SizeMismatch {
                got_w: w,
                got_h: h,
                want_w: sensor.width,
                want_h: sensor.height,
            });
        }
        let depth: Vec<f32> = depth_img
            .into_luma16()
            .into_raw()
            .into_iter()
            .map(|raw| raw as f32 / DEPTH_SCALE)
            .collect();

        let color_img = image::open(&color_path)?.into_rgba8();
        if color_img.dimensions() != (sensor.width, sensor.height) {
            return Err(DatasetError::SizeMismatch {
                got_w: color_img.width(),
                got_h: color_img.height(),
                want_w: sensor.width,
                want_h: sensor.height,
            });
        }
        let color: Vec<[u8; 4]> = color_img
            .into_raw()
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();

        Ok(SensorFrame::new(
            sensor.width,
            sensor.height,
            depth,
            color,
            self.poses[index],
        ))
    }
}

/// Parse a TUM image list: comment lines start with `#`, data lines are
/// `timestamp filename`.
fn load_image_list(root: &Path, list_name: &str) -> Result<Vec<PathBuf>, DatasetError> {
    let path = root.join(list_name);
    let contents =
        std::fs::read_to_string(&path).map_err(|_| DatasetError::MissingFile(path.clone()))?;

    let mut files = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let _timestamp = fields
            .next()
            .ok_or_else(|| DatasetError::Malformed(line.to_string()))?;
        let file = fields
            .next()
            .ok_or_else(|| DatasetError::Malformed(line.to_string()))?;
        files.push(PathBuf::from(file));
    }
    Ok(files)
}

/// Parse the depth/ground-truth association file: each line is
/// `ts_depth depth_file ts_gt tx ty tz qx qy qz qw`.
fn load_trajectory(path: &Path) -> Result<Vec<Mat4>, DatasetError> {
    let contents =
        std::fs::read_to_string(path).map_err(|_| DatasetError::MissingFile(path.to_path_buf()))?;

    let mut poses = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 10 {
            return Err(DatasetError::Malformed(line.to_string()));
        }
        let nums: Vec<f32> = fields[3..]
            .iter()
            .map(|f| f.parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|_| DatasetError::Malformed(line.to_string()))?;

        let translation = Vec3::new(nums[0], nums[1], nums[2]);
        let rotation = Quat::from_xyzw(nums[3], nums[4], nums[5], nums[6]).normalize();
        poses.push(Mat4::from_rotation_translation(rotation, translation));
    }
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sequence(dir: &Path) {
        // 4x3 depth at 1.0m (5000 raw) and a solid color image
        let mut depth = image::ImageBuffer::<image::Luma<u16>, _>::new(4, 3);
        for p in depth.pixels_mut() {
            *p = image::Luma([5000u16]);
        }
        depth.save(dir.join("d0.png")).unwrap();

        let mut color = image::ImageBuffer::<image::Rgba<u8>, _>::new(4, 3);
        for p in color.pixels_mut() {
            *p = image::Rgba([10, 20, 30, 255]);
        }
        color.save(dir.join("c0.png")).unwrap();

        let mut f = std::fs::File::create(dir.join("depth.txt")).unwrap();
        writeln!(f, "# depth maps").unwrap();
        writeln!(f, "0.0 d0.png").unwrap();

        let mut f = std::fs::File::create(dir.join("rgb.txt")).unwrap();
        writeln!(f, "# color images").unwrap();
        writeln!(f, "0.0 c0.png").unwrap();

        let mut f = std::fs::File::create(dir.join("depth_gt_associations.txt")).unwrap();
        writeln!(f, "0.0 d0.png 0.0 1.0 2.0 3.0 0.0 0.0 0.0 1.0").unwrap();
    }

    fn tiny_sensor() -> SensorParams {
        SensorParams {
            fx: 4.0,
            fy: 4.0,
            cx: 2.0,
            cy: 1.5,
            width: 4,
            height: 3,
            min_depth: 0.1,
            max_depth: 5.0,
        }
    }

    #[test]
    fn loads_a_complete_frame() {
        // Goal: lists, poses, and images wire together into one frame
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path());

        let dataset = TumDataset::open(dir.path()).unwrap();
        assert_eq!(dataset.len(), 1);

        let frame = dataset.load_frame(0, &tiny_sensor()).unwrap();
        assert_eq!(frame.depth_at(0, 0), 1.0);
        assert_eq!(frame.color_at(3, 2), [10, 20, 30, 255]);
        // Identity rotation, translation (1, 2, 3)
        let origin = frame.pose.transform_point3(glam::Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_sequence(dir.path());
        let dataset = TumDataset::open(dir.path()).unwrap();

        let mut sensor = tiny_sensor();
        sensor.width = 640;
        assert!(matches!(
            dataset.load_frame(0, &sensor),
            Err(DatasetError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn missing_list_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TumDataset::open(dir.path()),
            Err(DatasetError::MissingFile(_))
        ));
    }
}

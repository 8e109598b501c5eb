//! Rectification planning: rotations and projections that make epipolar
//! lines horizontal (or vertical for stacked rigs).

mod calibrated;
mod fundamental;
mod hartley;

pub use calibrated::stereo_rectify;
pub use fundamental::{epipolar_distances, estimate_fundamental};
pub use hartley::{stereo_rectify_uncalibrated, HARTLEY_THRESHOLD};

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2};
use serde::{Deserialize, Serialize};
use stereo_calib_core::{CameraIntrinsics, ImageSize};

use crate::correspondence::ImagePairRecord;
use crate::error::{CameraSide, RectifyError};
use crate::extrinsics::StereoExtrinsics;

/// How the rectifying transforms are derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RectificationMode {
    /// Bouguet's method from the calibrated `(R, T)`.
    #[default]
    Calibrated,
    /// Hartley's method from a fundamental matrix re-estimated on the
    /// correspondences; ignores `(R, T)`.
    Hartley,
}

impl fmt::Display for RectificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RectificationMode::Calibrated => f.write_str("calibrated"),
            RectificationMode::Hartley => f.write_str("hartley"),
        }
    }
}

impl FromStr for RectificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "calibrated" | "bouguet" => Ok(RectificationMode::Calibrated),
            "hartley" | "uncalibrated" => Ok(RectificationMode::Hartley),
            other => Err(format!("unknown rectification mode '{other}'")),
        }
    }
}

/// Integer pixel rectangle inside a rectified raster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidRoi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl ValidRoi {
    pub fn full(size: ImageSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }

    /// Intersect `(x, y, w, h)` (possibly negative or oversized) with the raster.
    pub fn clipped(x: f64, y: f64, w: f64, h: f64, size: ImageSize) -> Self {
        let x0 = x.max(0.0);
        let y0 = y.max(0.0);
        let x1 = (x + w).min(size.width as f64);
        let y1 = (y + h).min(size.height as f64);
        if !(x1 > x0 && y1 > y0) {
            return Self::default();
        }
        Self {
            x: x0 as usize,
            y: y0 as usize,
            width: (x1 - x0) as usize,
            height: (y1 - y0) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Rectifying rotations, new projections and the reprojection matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectificationTransform {
    pub mode: RectificationMode,
    pub image_size: ImageSize,
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    /// Disparity-to-depth matrix.
    pub q: Matrix4<f64>,
    pub roi1: ValidRoi,
    pub roi2: ValidRoi,
}

impl RectificationTransform {
    /// `true` when the baseline lies along the image y axis.
    pub fn is_vertical(&self) -> bool {
        self.p2[(1, 3)].abs() > self.p2[(0, 3)].abs()
    }

    pub fn rotation(&self, side: CameraSide) -> &Matrix3<f64> {
        match side {
            CameraSide::Left => &self.r1,
            CameraSide::Right => &self.r2,
        }
    }

    /// Left 3x3 block of the new projection matrix.
    pub fn projection(&self, side: CameraSide) -> Matrix3<f64> {
        let p = match side {
            CameraSide::Left => &self.p1,
            CameraSide::Right => &self.p2,
        };
        p.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Where a raw pixel of `side` lands in its rectified image.
    pub fn rectify_point(
        &self,
        side: CameraSide,
        camera: &CameraIntrinsics,
        px: Point2<f64>,
    ) -> Point2<f64> {
        camera.undistort_rectify_pixel(px, self.rotation(side), &self.projection(side))
    }
}

/// `[K | 0]`.
pub(crate) fn projection_from_camera(k: &Matrix3<f64>) -> Matrix3x4<f64> {
    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(k);
    p
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectificationPlanner {
    pub mode: RectificationMode,
    /// Free scaling for the calibrated mode: 0 keeps only valid pixels,
    /// 1 keeps every source pixel.
    pub alpha: f64,
    /// Outlier threshold (pixels) for the Hartley fundamental matrix.
    pub hartley_threshold: f64,
}

impl Default for RectificationPlanner {
    fn default() -> Self {
        Self {
            mode: RectificationMode::Calibrated,
            alpha: 1.0,
            hartley_threshold: HARTLEY_THRESHOLD,
        }
    }
}

impl RectificationPlanner {
    pub fn new(mode: RectificationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn plan(
        &self,
        left: &CameraIntrinsics,
        right: &CameraIntrinsics,
        extrinsics: &StereoExtrinsics,
        pairs: &[ImagePairRecord],
    ) -> Result<RectificationTransform, RectifyError> {
        let size = left.image_size;
        let plan = match self.mode {
            RectificationMode::Calibrated => stereo_rectify(
                left,
                right,
                &extrinsics.rotation,
                &extrinsics.translation,
                size,
                self.alpha,
            )?,
            RectificationMode::Hartley => {
                let mut l = Vec::new();
                let mut r = Vec::new();
                for pair in pairs {
                    l.extend(pair.left.iter().map(|p| left.undistort_pixel(*p)));
                    r.extend(pair.right.iter().map(|p| right.undistort_pixel(*p)));
                }
                stereo_rectify_uncalibrated(left, right, &l, &r, size, self.hartley_threshold)?
            }
        };
        log::info!(
            "{} rectification planned ({} rig)",
            plan.mode,
            if plan.is_vertical() { "vertical" } else { "horizontal" }
        );
        Ok(plan)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extrinsics::StereoExtrinsics;
    use std::path::PathBuf;
    use stereo_calib_core::synthetic::{project_points, CheckerboardPattern, StereoRig};

    pub(crate) fn synthetic_pairs(rig: &StereoRig, count: usize) -> Vec<ImagePairRecord> {
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let object = pattern.inner_corners();
        let rel = rig.right_from_left();
        rig.board_poses(&pattern, 600.0, count)
            .iter()
            .enumerate()
            .map(|(index, pose)| ImagePairRecord {
                index,
                left_path: PathBuf::from(format!("l{index}")),
                right_path: PathBuf::from(format!("r{index}")),
                left: project_points(&rig.left, pose, &object).expect("left"),
                right: project_points(&rig.right, &(rel * pose), &object).expect("right"),
            })
            .collect()
    }

    /// Largest row difference between rectified correspondences.
    pub(crate) fn max_row_error(
        plan: &RectificationTransform,
        rig: &StereoRig,
        pairs: &[ImagePairRecord],
    ) -> f64 {
        pairs
            .iter()
            .flat_map(|p| p.left.iter().zip(&p.right))
            .map(|(l, r)| {
                let a = plan.rectify_point(CameraSide::Left, &rig.left, *l);
                let b = plan.rectify_point(CameraSide::Right, &rig.right, *r);
                (a.y - b.y).abs()
            })
            .fold(0.0, f64::max)
    }

    fn rig_extrinsics(rig: &StereoRig) -> StereoExtrinsics {
        StereoExtrinsics::from_motion(rig.rotation, rig.translation, &rig.left, &rig.right, 0.0)
            .expect("extrinsics")
    }

    #[test]
    fn both_modes_row_align_the_rig() {
        let rig = StereoRig::example();
        let pairs = synthetic_pairs(&rig, 4);
        let ext = rig_extrinsics(&rig);

        let calibrated = RectificationPlanner::new(RectificationMode::Calibrated)
            .plan(&rig.left, &rig.right, &ext, &pairs)
            .expect("calibrated plan");
        assert!(!calibrated.is_vertical());
        let err = max_row_error(&calibrated, &rig, &pairs);
        assert!(err < 1e-3, "calibrated row error {err}");

        let hartley = RectificationPlanner::new(RectificationMode::Hartley)
            .plan(&rig.left, &rig.right, &ext, &pairs)
            .expect("hartley plan");
        assert_eq!(hartley.mode, RectificationMode::Hartley);
        let err = max_row_error(&hartley, &rig, &pairs);
        assert!(err < 0.05, "hartley row error {err}");
    }

    #[test]
    fn mode_parses_from_cli_spelling() {
        assert_eq!("hartley".parse::<RectificationMode>(), Ok(RectificationMode::Hartley));
        assert_eq!(
            "Calibrated".parse::<RectificationMode>(),
            Ok(RectificationMode::Calibrated)
        );
        assert!("stereo".parse::<RectificationMode>().is_err());
        assert_eq!(RectificationMode::Hartley.to_string(), "hartley");
    }

    #[test]
    fn roi_is_clipped_to_raster() {
        let size = ImageSize::new(640, 480);
        let roi = ValidRoi::clipped(-5.0, 10.0, 700.0, 100.0, size);
        assert_eq!(
            roi,
            ValidRoi {
                x: 0,
                y: 10,
                width: 640,
                height: 100
            }
        );
        assert!(ValidRoi::clipped(700.0, 0.0, 10.0, 10.0, size).is_empty());
    }
}

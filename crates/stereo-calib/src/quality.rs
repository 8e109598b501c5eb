//! Epipolar consistency check of a stereo calibration.

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};
use stereo_calib_core::CameraIntrinsics;

use crate::correspondence::ImagePairRecord;
use crate::rectify::epipolar_distances;

/// Mean symmetric point-to-epipolar-line distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpipolarReport {
    /// Mean of `d(x_right, F x_left) + d(x_left, F^T x_right)` over all points, pixels.
    pub mean_error: f64,
    pub points: usize,
}

/// Diagnostic only: scores how well `fundamental` explains the observed
/// correspondences after removing lens distortion.
#[derive(Clone, Copy, Debug)]
pub struct QualityVerifier<'a> {
    left: &'a CameraIntrinsics,
    right: &'a CameraIntrinsics,
    fundamental: &'a Matrix3<f64>,
}

impl<'a> QualityVerifier<'a> {
    pub fn new(
        left: &'a CameraIntrinsics,
        right: &'a CameraIntrinsics,
        fundamental: &'a Matrix3<f64>,
    ) -> Self {
        Self {
            left,
            right,
            fundamental,
        }
    }

    /// Symmetric epipolar distance of one raw pixel correspondence.
    pub fn point_error(&self, left_px: Point2<f64>, right_px: Point2<f64>) -> f64 {
        let xl = self.left.undistort_pixel(left_px);
        let xr = self.right.undistort_pixel(right_px);
        match epipolar_distances(self.fundamental, xl, xr) {
            Some((in_right, in_left)) => in_right + in_left,
            None => f64::INFINITY,
        }
    }

    pub fn evaluate(&self, pairs: &[ImagePairRecord]) -> EpipolarReport {
        let mut total = 0.0;
        let mut points = 0;
        for pair in pairs {
            for (l, r) in pair.left.iter().zip(&pair.right) {
                total += self.point_error(*l, *r);
                points += 1;
            }
        }
        let mean_error = if points == 0 {
            0.0
        } else {
            total / points as f64
        };
        log::info!("average epipolar error: {mean_error:.4}px over {points} points");
        EpipolarReport { mean_error, points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrinsics::StereoExtrinsics;
    use crate::rectify::tests::synthetic_pairs;
    use nalgebra::Vector3;
    use stereo_calib_core::synthetic::StereoRig;

    #[test]
    fn clean_rig_has_small_error() {
        let rig = StereoRig::example();
        let pairs = synthetic_pairs(&rig, 3);
        let ext = StereoExtrinsics::from_motion(rig.rotation, rig.translation, &rig.left, &rig.right, 0.0)
            .expect("matrices");
        let report = QualityVerifier::new(&rig.left, &rig.right, &ext.fundamental).evaluate(&pairs);
        assert_eq!(report.points, 3 * 54);
        assert!(report.mean_error < 0.5, "mean error {}", report.mean_error);
    }

    #[test]
    fn corrupted_fundamental_is_flagged() {
        let rig = StereoRig::example();
        let pairs = synthetic_pairs(&rig, 3);
        // Wrong relative motion: a vertical baseline and a twisted rotation.
        let wrong_r = stereo_calib_core::geometry::rodrigues(&Vector3::new(0.0, 0.0, 0.08));
        let ext = StereoExtrinsics::from_motion(
            wrong_r,
            Vector3::new(-10.0, -60.0, 0.0),
            &rig.left,
            &rig.right,
            0.0,
        )
        .expect("matrices");
        let report = QualityVerifier::new(&rig.left, &rig.right, &ext.fundamental).evaluate(&pairs);
        assert!(report.mean_error > 1.0, "mean error {}", report.mean_error);
    }

    #[test]
    fn empty_input_reports_zero() {
        let rig = StereoRig::example();
        let f = Matrix3::identity();
        let report = QualityVerifier::new(&rig.left, &rig.right, &f).evaluate(&[]);
        assert_eq!(report.points, 0);
        assert_eq!(report.mean_error, 0.0);
    }
}

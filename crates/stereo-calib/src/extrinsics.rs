//! Joint stereo solve for the rigid transform between the two cameras.
//!
//! Intrinsics are frozen. During the solve both cameras share one focal
//! length `f = (fy_left + fy_right) / 2`, each keeping its own aspect ratio.

use log::{debug, info};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn, Isometry3, Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use stereo_calib_core::geometry::{mean_rotation, pose_from_params, pose_from_rt, pose_to_params, skew};
use stereo_calib_core::lm::{self, collect_residuals, difference_column, LeastSquaresProblem, LmOptions};
use stereo_calib_core::CameraIntrinsics;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::CalibrationError;
use crate::projection::{estimate_board_pose, reprojection_residuals, rms_from_cost};

const REL_PARAMS: usize = 6;
const POSE_PARAMS: usize = 6;

/// Rigid transform from the left to the right camera frame plus the derived
/// epipolar matrices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    /// `X_right = rotation * X_left + translation`.
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub essential: Matrix3<f64>,
    pub fundamental: Matrix3<f64>,
    /// RMS reprojection error over both cameras, pixels.
    pub rms: f64,
}

impl StereoExtrinsics {
    /// Assemble from `(R, T)` and the intrinsics the epipolar geometry refers to.
    pub fn from_motion(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        left: &CameraIntrinsics,
        right: &CameraIntrinsics,
        rms: f64,
    ) -> Option<Self> {
        let essential = essential_matrix(&rotation, &translation);
        let fundamental = fundamental_from_essential(&essential, left, right)?;
        Some(Self {
            rotation,
            translation,
            essential,
            fundamental,
            rms,
        })
    }

    pub fn baseline(&self) -> f64 {
        self.translation.norm()
    }
}

/// `E = [T]x R`.
pub fn essential_matrix(r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3<f64> {
    skew(t) * r
}

/// `F = K_right^-T E K_left^-1`, scaled so `F[2,2] = 1` when that entry is
/// not close to zero.
pub fn fundamental_from_essential(
    e: &Matrix3<f64>,
    left: &CameraIntrinsics,
    right: &CameraIntrinsics,
) -> Option<Matrix3<f64>> {
    let kl_inv = left.matrix().try_inverse()?;
    let kr_inv = right.matrix().try_inverse()?;
    let mut f = kr_inv.transpose() * e * kl_inv;
    if f[(2, 2)].abs() > f64::EPSILON {
        f /= f[(2, 2)];
    }
    Some(f)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoCalibratorOptions {
    pub lm: LmOptions,
    /// Force both cameras onto one focal length during the solve.
    pub shared_focal: bool,
}

impl Default for StereoCalibratorOptions {
    fn default() -> Self {
        Self {
            lm: LmOptions::with_limits(100, 1e-5),
            shared_focal: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StereoExtrinsicCalibrator {
    pub options: StereoCalibratorOptions,
}

/// Intrinsics with the focal lengths replaced by the shared focal.
fn shared_focal_pair(
    left: &CameraIntrinsics,
    right: &CameraIntrinsics,
) -> (CameraIntrinsics, CameraIntrinsics) {
    let f = 0.5 * (left.fy + right.fy);
    let adjust = |c: &CameraIntrinsics| {
        let mut out = *c;
        out.fx = f * c.fx / c.fy;
        out.fy = f;
        out
    };
    (adjust(left), adjust(right))
}

struct StereoProblem<'a> {
    object: &'a [Point3<f64>],
    left_views: &'a [Vec<Point2<f64>>],
    right_views: &'a [Vec<Point2<f64>>],
    left: CameraIntrinsics,
    right: CameraIntrinsics,
    /// `[right_from_left, left_pose_0, left_pose_1, ...]`, six entries each.
    params: DVector<f64>,
}

impl StereoProblem<'_> {
    fn rows_per_view(&self) -> usize {
        4 * self.object.len()
    }

    fn num_residuals(&self) -> usize {
        self.rows_per_view() * self.left_views.len()
    }

    fn view_residuals(&self, params: &[f64], view: usize, out: &mut [f64]) {
        let rel = pose_from_params(&params[..REL_PARAMS]);
        let off = REL_PARAMS + POSE_PARAMS * view;
        let left_pose = pose_from_params(&params[off..off + POSE_PARAMS]);
        let right_pose = rel * left_pose;
        let (l, r) = out.split_at_mut(2 * self.object.len());
        reprojection_residuals(&self.left, &left_pose, self.object, &self.left_views[view], l);
        reprojection_residuals(&self.right, &right_pose, self.object, &self.right_views[view], r);
    }

    fn fill(&self, params: &[f64], out: &mut [f64]) {
        let rows = self.rows_per_view();
        for (v, chunk) in out.chunks_exact_mut(rows).enumerate() {
            self.view_residuals(params, v, chunk);
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for StereoProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(collect_residuals(self.num_residuals(), |out| {
            self.fill(self.params.as_slice(), out)
        }))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let rows = self.rows_per_view();
        let m = self.num_residuals();
        let mut jac = DMatrix::zeros(m, self.params.len());
        let mut x = self.params.as_slice().to_vec();
        let (mut plus, mut minus) = (vec![0.0; m], vec![0.0; m]);

        for j in 0..REL_PARAMS {
            let scratch = (plus.as_mut_slice(), minus.as_mut_slice());
            difference_column(&mut x, j, 0, scratch, &mut jac, |p, out| self.fill(p, out));
        }
        for v in 0..self.left_views.len() {
            for k in 0..POSE_PARAMS {
                let j = REL_PARAMS + POSE_PARAMS * v + k;
                let scratch = (&mut plus[..rows], &mut minus[..rows]);
                difference_column(&mut x, j, v * rows, scratch, &mut jac, |p, out| {
                    self.view_residuals(p, v, out)
                });
            }
        }
        Some(jac)
    }
}

impl StereoExtrinsicCalibrator {
    pub fn new(options: StereoCalibratorOptions) -> Self {
        Self { options }
    }

    /// Solve for `(R, T)` with both cameras' intrinsics held fixed.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(views = left_views.len()))
    )]
    pub fn calibrate(
        &self,
        object: &[Point3<f64>],
        left_views: &[Vec<Point2<f64>>],
        right_views: &[Vec<Point2<f64>>],
        left: &CameraIntrinsics,
        right: &CameraIntrinsics,
    ) -> Result<StereoExtrinsics, CalibrationError> {
        if left_views.len() != right_views.len() {
            return Err(CalibrationError::ViewCountMismatch {
                left: left_views.len(),
                right: right_views.len(),
            });
        }
        if left_views.is_empty() {
            return Err(CalibrationError::NotEnoughViews {
                required: 1,
                got: 0,
            });
        }
        for (view, pts) in left_views.iter().chain(right_views).enumerate() {
            if pts.len() != object.len() {
                return Err(CalibrationError::PointCountMismatch {
                    view: view % left_views.len(),
                    expected: object.len(),
                    got: pts.len(),
                });
            }
        }

        let (cam_l, cam_r) = if self.options.shared_focal {
            shared_focal_pair(left, right)
        } else {
            (*left, *right)
        };

        let mut left_poses = Vec::with_capacity(left_views.len());
        let mut rotations = Vec::with_capacity(left_views.len());
        let mut translation_sum = Vector3::zeros();
        for (l, r) in left_views.iter().zip(right_views) {
            let pl = estimate_board_pose(&cam_l, object, l)
                .ok_or(CalibrationError::Degenerate("left board pose"))?;
            let pr = estimate_board_pose(&cam_r, object, r)
                .ok_or(CalibrationError::Degenerate("right board pose"))?;
            let rl = pl.rotation.to_rotation_matrix().into_inner();
            let rr = pr.rotation.to_rotation_matrix().into_inner();
            let ri = rr * rl.transpose();
            translation_sum += pr.translation.vector - ri * pl.translation.vector;
            rotations.push(ri);
            left_poses.push(pl);
        }
        let r0 = mean_rotation(&rotations).ok_or(CalibrationError::Degenerate("rotation mean"))?;
        let t0 = translation_sum / left_views.len() as f64;
        debug!("initial stereo translation {:?}", t0.as_slice());

        let mut x0 = Vec::with_capacity(REL_PARAMS + POSE_PARAMS * left_views.len());
        x0.extend_from_slice(pose_to_params(&pose_from_rt(&r0, &t0)).as_slice());
        for p in &left_poses {
            x0.extend_from_slice(pose_to_params(p).as_slice());
        }

        let problem = StereoProblem {
            object,
            left_views,
            right_views,
            left: cam_l,
            right: cam_r,
            params: DVector::from_vec(x0),
        };
        let (solved, report) = lm::solve(problem, &self.options.lm)?;
        let x = solved.params;
        if !x.iter().all(|v| v.is_finite()) {
            return Err(CalibrationError::NonFinite);
        }

        let rel: Isometry3<f64> = pose_from_params(&x.as_slice()[..REL_PARAMS]);
        let rotation = rel.rotation.to_rotation_matrix().into_inner();
        let translation = rel.translation.vector;
        let rms = rms_from_cost(report.final_cost, 2 * object.len() * left_views.len());

        let extrinsics = StereoExtrinsics::from_motion(rotation, translation, &cam_l, &cam_r, rms)
            .ok_or(CalibrationError::Degenerate("singular camera matrix"))?;
        info!(
            "stereo: baseline={:.3} rms={:.4}px ({} evaluations, {})",
            extrinsics.baseline(),
            rms,
            report.evaluations,
            report.termination
        );
        Ok(extrinsics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use stereo_calib_core::synthetic::{project_points, CheckerboardPattern, StereoRig};

    fn rig_views(
        count: usize,
    ) -> (StereoRig, Vec<Point3<f64>>, Vec<Vec<Point2<f64>>>, Vec<Vec<Point2<f64>>>) {
        let rig = StereoRig::example();
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let object = pattern.inner_corners();
        let rel = rig.right_from_left();
        let mut left = Vec::new();
        let mut right = Vec::new();
        for pose in rig.board_poses(&pattern, 600.0, count) {
            left.push(project_points(&rig.left, &pose, &object).expect("left"));
            right.push(project_points(&rig.right, &(rel * pose), &object).expect("right"));
        }
        (rig, object, left, right)
    }

    #[test]
    fn recovers_relative_motion() {
        let (rig, object, left, right) = rig_views(5);
        let ext = StereoExtrinsicCalibrator::default()
            .calibrate(&object, &left, &right, &rig.left, &rig.right)
            .expect("stereo");
        assert_relative_eq!(ext.rotation, rig.rotation, epsilon = 1e-6);
        assert_relative_eq!(ext.translation, rig.translation, epsilon = 1e-3);
        assert!(ext.rms < 1e-3, "rms {}", ext.rms);
    }

    #[test]
    fn fundamental_satisfies_epipolar_constraint() {
        let (rig, _, left, right) = rig_views(2);
        let ext = StereoExtrinsics::from_motion(rig.rotation, rig.translation, &rig.left, &rig.right, 0.0)
            .expect("matrices");
        assert_relative_eq!(ext.fundamental[(2, 2)], 1.0, epsilon = 1e-12);
        for (l, r) in left[0].iter().zip(&right[0]) {
            let xl = rig.left.undistort_pixel(*l);
            let xr = rig.right.undistort_pixel(*r);
            let line = ext.fundamental * Vector3::new(xl.x, xl.y, 1.0);
            let dist = (line.x * xr.x + line.y * xr.y + line.z).abs() / line.xy().norm();
            assert!(dist < 1e-6, "distance to epipolar line {dist}");
        }
    }

    #[test]
    fn unequal_focals_share_the_mean_during_the_solve() {
        let rig = StereoRig::example();
        let mut left = rig.left;
        left.fx = 808.0;
        left.fy = 800.0;
        let mut right = rig.right;
        right.fx = 831.6;
        right.fy = 840.0;
        let (left_before, right_before) = (left, right);

        let (shared_l, shared_r) = shared_focal_pair(&left, &right);
        assert_relative_eq!(shared_l.fy, 820.0, epsilon = 1e-12);
        assert_relative_eq!(shared_r.fy, 820.0, epsilon = 1e-12);
        assert_relative_eq!(shared_l.fx / shared_l.fy, left.fx / left.fy, epsilon = 1e-12);
        assert_relative_eq!(shared_r.fx / shared_r.fy, right.fx / right.fy, epsilon = 1e-12);
        assert_eq!(shared_l.distortion, left.distortion);
        assert_eq!((shared_r.cx, shared_r.cy), (right.cx, right.cy));

        // Corners seen through the shared matrices fit exactly.
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let object = pattern.inner_corners();
        let rel = rig.right_from_left();
        let mut left_views = Vec::new();
        let mut right_views = Vec::new();
        for pose in rig.board_poses(&pattern, 600.0, 4) {
            left_views.push(project_points(&shared_l, &pose, &object).expect("left"));
            right_views.push(project_points(&shared_r, &(rel * pose), &object).expect("right"));
        }
        let ext = StereoExtrinsicCalibrator::default()
            .calibrate(&object, &left_views, &right_views, &left, &right)
            .expect("stereo");
        assert!(ext.rms < 1e-3, "rms {}", ext.rms);
        assert_relative_eq!(ext.translation, rig.translation, epsilon = 1e-3);

        let expected = fundamental_from_essential(&ext.essential, &shared_l, &shared_r).expect("F");
        assert_relative_eq!(ext.fundamental, expected, epsilon = 1e-12);
        let own = fundamental_from_essential(&ext.essential, &left, &right).expect("F");
        assert!((ext.fundamental - own).amax() > 1e-3 * ext.fundamental.amax());

        assert_eq!(left, left_before);
        assert_eq!(right, right_before);
    }

    #[test]
    fn mismatched_view_counts_are_rejected() {
        let (rig, object, left, right) = rig_views(3);
        let err = StereoExtrinsicCalibrator::default()
            .calibrate(&object, &left, &right[..2], &rig.left, &rig.right)
            .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::ViewCountMismatch { left: 3, right: 2 }
        ));
    }
}

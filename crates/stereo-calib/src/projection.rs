//! Reprojection residuals and single-view pose estimation shared by the
//! calibrators.

use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn, Isometry3, Point2, Point3};
use stereo_calib_core::geometry::{pose_from_normalized_homography, pose_from_params, pose_to_params};
use stereo_calib_core::lm::{self, collect_residuals, difference_column, LeastSquaresProblem, LmOptions};
use stereo_calib_core::{estimate_homography, CameraIntrinsics};

/// Residual written for points that land behind the camera.
pub(crate) const BEHIND_CAMERA_RESIDUAL: f64 = 1e3;

/// `projected - observed` for every board point, two entries per point.
pub(crate) fn reprojection_residuals(
    cam: &CameraIntrinsics,
    pose: &Isometry3<f64>,
    object: &[Point3<f64>],
    observed: &[Point2<f64>],
    out: &mut [f64],
) {
    for ((p, obs), r) in object.iter().zip(observed).zip(out.chunks_exact_mut(2)) {
        match cam.project(&(pose * p)) {
            Some(px) => {
                r[0] = px.x - obs.x;
                r[1] = px.y - obs.y;
            }
            None => {
                r[0] = BEHIND_CAMERA_RESIDUAL;
                r[1] = BEHIND_CAMERA_RESIDUAL;
            }
        }
    }
}

/// RMS of a residual vector given as a sum of squares over `points` 2-D points.
pub(crate) fn rms_from_cost(cost: f64, points: usize) -> f64 {
    if points == 0 {
        return 0.0;
    }
    (cost / points as f64).sqrt()
}

struct PoseProblem<'a> {
    cam: &'a CameraIntrinsics,
    object: &'a [Point3<f64>],
    observed: &'a [Point2<f64>],
    params: DVector<f64>,
}

impl PoseProblem<'_> {
    fn fill(&self, params: &[f64], out: &mut [f64]) {
        let pose = pose_from_params(params);
        reprojection_residuals(self.cam, &pose, self.object, self.observed, out);
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem<'_> {
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
        Some(collect_residuals(2 * self.object.len(), |out| {
            self.fill(self.params.as_slice(), out)
        }))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let m = 2 * self.object.len();
        let mut jac = DMatrix::zeros(m, 6);
        let mut x = self.params.as_slice().to_vec();
        let (mut plus, mut minus) = (vec![0.0; m], vec![0.0; m]);
        for j in 0..6 {
            let scratch = (plus.as_mut_slice(), minus.as_mut_slice());
            difference_column(&mut x, j, 0, scratch, &mut jac, |p, out| self.fill(p, out));
        }
        Some(jac)
    }
}

/// Board-to-camera pose of one view with known intrinsics.
///
/// The plane homography is fitted on undistorted normalized coordinates,
/// decomposed, and then refined by minimizing the reprojection error.
pub fn estimate_board_pose(
    cam: &CameraIntrinsics,
    object: &[Point3<f64>],
    observed: &[Point2<f64>],
) -> Option<Isometry3<f64>> {
    if object.len() != observed.len() {
        return None;
    }
    let src: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let dst: Vec<Point2<f64>> = observed
        .iter()
        .map(|&px| cam.pixel_to_normalized(px))
        .collect();
    let h = estimate_homography(&src, &dst)?;
    let initial = pose_from_normalized_homography(&h)?;

    let problem = PoseProblem {
        cam,
        object,
        observed,
        params: DVector::from_column_slice(pose_to_params(&initial).as_slice()),
    };
    match lm::solve(problem, &LmOptions::with_limits(20, 1e-12)) {
        Ok((solved, _)) => Some(pose_from_params(solved.params.as_slice())),
        Err(err) => {
            log::debug!("pose refinement failed ({err}), keeping homography pose");
            Some(initial)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_calib_core::synthetic::{project_points, CheckerboardPattern, StereoRig};

    #[test]
    fn recovers_board_pose_from_distorted_view() {
        let rig = StereoRig::example();
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let object = pattern.inner_corners();
        let truth = rig.board_poses(&pattern, 600.0, 3)[2];
        let observed = project_points(&rig.left, &truth, &object).expect("visible");

        let pose = estimate_board_pose(&rig.left, &object, &observed).expect("pose");
        assert!((pose.translation.vector - truth.translation.vector).norm() < 1e-3);
        assert!(pose.rotation.angle_to(&truth.rotation) < 1e-6);
    }

    #[test]
    fn residuals_vanish_on_exact_projection() {
        let rig = StereoRig::example();
        let pattern = CheckerboardPattern::new(4, 3, 30.0);
        let object = pattern.inner_corners();
        let pose = rig.board_poses(&pattern, 500.0, 1)[0];
        let observed = project_points(&rig.right, &pose, &object).expect("visible");
        let mut out = vec![1.0; 2 * object.len()];
        reprojection_residuals(&rig.right, &pose, &object, &observed, &mut out);
        assert!(out.iter().all(|r| r.abs() < 1e-9));
        assert_eq!(rms_from_cost(8.0, 2), 2.0);
    }
}

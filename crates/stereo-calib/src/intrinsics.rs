//! Single-camera calibration from planar views.
//!
//! Parameters are `[fx, fy, cx, cy, k1, k2, p1, p2]` followed by one
//! `[rx, ry, rz, tx, ty, tz]` board pose per view. `k3` stays at zero.

use log::{debug, info};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn, Isometry3, Matrix2, Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};
use stereo_calib_core::geometry::{pose_from_normalized_homography, pose_from_params, pose_to_params};
use stereo_calib_core::lm::{
    self, collect_residuals, difference_column, LeastSquaresProblem, LmOptions, SolveReport,
};
use stereo_calib_core::{estimate_homography, CameraIntrinsics, Distortion, Homography, ImageSize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::CalibrationError;
use crate::projection::{reprojection_residuals, rms_from_cost};

const INTRINSIC_PARAMS: usize = 8;
const POSE_PARAMS: usize = 6;
const MIN_VIEWS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicCalibratorOptions {
    pub lm: LmOptions,
    /// Keep `p1 = p2 = 0`.
    pub fix_tangential: bool,
    /// Keep `k2 = 0`.
    pub fix_k2: bool,
}

impl Default for IntrinsicCalibratorOptions {
    fn default() -> Self {
        Self {
            lm: LmOptions::default(),
            fix_tangential: false,
            fix_k2: false,
        }
    }
}

/// Result of [`IntrinsicCalibrator::calibrate`].
#[derive(Clone, Debug)]
pub struct IntrinsicCalibration {
    /// Fitted model; `camera.rms` holds the reprojection RMS in pixels.
    pub camera: CameraIntrinsics,
    /// Board-to-camera pose per view.
    pub poses: Vec<Isometry3<f64>>,
    pub report: SolveReport,
}

#[derive(Clone, Debug, Default)]
pub struct IntrinsicCalibrator {
    pub options: IntrinsicCalibratorOptions,
}

fn camera_from_params(p: &[f64], image_size: ImageSize) -> CameraIntrinsics {
    CameraIntrinsics::pinhole(p[0], p[1], p[2], p[3], image_size)
        .with_distortion(Distortion::new(p[4], p[5], p[6], p[7]))
}

struct IntrinsicProblem<'a> {
    object: &'a [Point3<f64>],
    views: &'a [Vec<Point2<f64>>],
    image_size: ImageSize,
    /// Frozen intrinsics stay at zero.
    frozen: [bool; INTRINSIC_PARAMS],
    params: DVector<f64>,
}

impl IntrinsicProblem<'_> {
    fn rows_per_view(&self) -> usize {
        2 * self.object.len()
    }

    fn num_residuals(&self) -> usize {
        self.rows_per_view() * self.views.len()
    }

    fn view_residuals(&self, params: &[f64], view: usize, out: &mut [f64]) {
        let cam = camera_from_params(params, self.image_size);
        let off = INTRINSIC_PARAMS + POSE_PARAMS * view;
        let pose = pose_from_params(&params[off..off + POSE_PARAMS]);
        reprojection_residuals(&cam, &pose, self.object, &self.views[view], out);
    }

    fn fill(&self, params: &[f64], out: &mut [f64]) {
        let rows = self.rows_per_view();
        for (v, chunk) in out.chunks_exact_mut(rows).enumerate() {
            self.view_residuals(params, v, chunk);
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for IntrinsicProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
        for (j, _) in self.frozen.iter().enumerate().filter(|(_, f)| **f) {
            self.params[j] = 0.0;
        }
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(collect_residuals(self.num_residuals(), |out| {
            self.fill(self.params.as_slice(), out)
        }))
    }

    /// Central differences; a pose only moves its own view's rows and
    /// frozen columns stay zero.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let rows = self.rows_per_view();
        let m = self.num_residuals();
        let mut jac = DMatrix::zeros(m, self.params.len());
        let mut x = self.params.as_slice().to_vec();
        let (mut plus, mut minus) = (vec![0.0; m], vec![0.0; m]);

        for j in (0..INTRINSIC_PARAMS).filter(|&j| !self.frozen[j]) {
            let scratch = (plus.as_mut_slice(), minus.as_mut_slice());
            difference_column(&mut x, j, 0, scratch, &mut jac, |p, out| self.fill(p, out));
        }
        for v in 0..self.views.len() {
            for k in 0..POSE_PARAMS {
                let j = INTRINSIC_PARAMS + POSE_PARAMS * v + k;
                let scratch = (&mut plus[..rows], &mut minus[..rows]);
                difference_column(&mut x, j, v * rows, scratch, &mut jac, |p, out| {
                    self.view_residuals(p, v, out)
                });
            }
        }
        Some(jac)
    }
}

/// Subtract the principal point from a plane homography and return the two
/// constraint rows `(A, b)` on `(1/fx^2, 1/fy^2)`.
fn focal_constraints(h: &Matrix3<f64>, cx: f64, cy: f64) -> [([f64; 2], f64); 2] {
    let mut hc = *h;
    for c in 0..3 {
        hc[(0, c)] -= hc[(2, c)] * cx;
        hc[(1, c)] -= hc[(2, c)] * cy;
    }
    let hv = hc.column(0).into_owned();
    let vv = hc.column(1).into_owned();
    let d1 = (hv + vv) * 0.5;
    let d2 = (hv - vv) * 0.5;
    let hv = hv.normalize();
    let vv = vv.normalize();
    let d1 = d1.normalize();
    let d2 = d2.normalize();
    [
        ([hv[0] * vv[0], hv[1] * vv[1]], -hv[2] * vv[2]),
        ([d1[0] * d2[0], d1[1] * d2[1]], -d1[2] * d2[2]),
    ]
}

/// Closed-form focal lengths with the principal point fixed at the centre.
fn initial_focal(homographies: &[Homography], image_size: ImageSize, cx: f64, cy: f64) -> (f64, f64) {
    let rows: Vec<([f64; 2], f64)> = homographies
        .iter()
        .flat_map(|h| focal_constraints(&h.h, cx, cy))
        .collect();

    let mut ata = Matrix2::zeros();
    let mut atb = Vector2::zeros();
    for (a, b) in &rows {
        let a = Vector2::new(a[0], a[1]);
        ata += a * a.transpose();
        atb += a * *b;
    }
    let valid = |f: f64| f.is_finite() && f > 1.0;

    if let Some(inv) = ata.try_inverse() {
        let s = inv * atb;
        let fx = (1.0 / s[0]).abs().sqrt();
        let fy = (1.0 / s[1]).abs().sqrt();
        if valid(fx) && valid(fy) {
            return (fx, fy);
        }
    }

    // Shared focal: a single unknown 1/f^2.
    let (num, den) = rows.iter().fold((0.0, 0.0), |(n, d), (a, b)| {
        let s = a[0] + a[1];
        (n + s * b, d + s * s)
    });
    if den > f64::EPSILON {
        let f = (den / num).abs().sqrt();
        if valid(f) {
            debug!("focal init fell back to a shared focal length");
            return (f, f);
        }
    }

    let f = image_size.width.max(image_size.height) as f64;
    debug!("focal init fell back to max(width, height) = {f}");
    (f, f)
}

impl IntrinsicCalibrator {
    pub fn new(options: IntrinsicCalibratorOptions) -> Self {
        Self { options }
    }

    /// Fit one camera from the board points and its per-view corners.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, object, views), fields(views = views.len()))
    )]
    pub fn calibrate(
        &self,
        object: &[Point3<f64>],
        views: &[Vec<Point2<f64>>],
        image_size: ImageSize,
    ) -> Result<IntrinsicCalibration, CalibrationError> {
        if views.len() < MIN_VIEWS {
            return Err(CalibrationError::NotEnoughViews {
                required: MIN_VIEWS,
                got: views.len(),
            });
        }
        if object.len() < 4 {
            return Err(CalibrationError::Degenerate("board has fewer than 4 points"));
        }
        for (view, pts) in views.iter().enumerate() {
            if pts.len() != object.len() {
                return Err(CalibrationError::PointCountMismatch {
                    view,
                    expected: object.len(),
                    got: pts.len(),
                });
            }
        }

        let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let homographies = views
            .iter()
            .map(|pts| estimate_homography(&plane, pts))
            .collect::<Option<Vec<_>>>()
            .ok_or(CalibrationError::Degenerate("plane homography failed"))?;

        let cx = (image_size.width as f64 - 1.0) * 0.5;
        let cy = (image_size.height as f64 - 1.0) * 0.5;
        let (fx, fy) = initial_focal(&homographies, image_size, cx, cy);
        debug!("initial intrinsics fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2}");

        let k0 = CameraIntrinsics::pinhole(fx, fy, cx, cy, image_size);
        let k_inv = k0
            .matrix()
            .try_inverse()
            .ok_or(CalibrationError::Degenerate("singular initial camera matrix"))?;

        let mut x0 = Vec::with_capacity(INTRINSIC_PARAMS + POSE_PARAMS * views.len());
        x0.extend_from_slice(&[fx, fy, cx, cy, 0.0, 0.0, 0.0, 0.0]);
        for h in &homographies {
            let pose = pose_from_normalized_homography(&Homography::new(k_inv * h.h))
                .ok_or(CalibrationError::Degenerate("homography decomposition failed"))?;
            x0.extend_from_slice(pose_to_params(&pose).as_slice());
        }

        let mut frozen = [false; INTRINSIC_PARAMS];
        frozen[5] = self.options.fix_k2;
        frozen[6] = self.options.fix_tangential;
        frozen[7] = self.options.fix_tangential;

        let problem = IntrinsicProblem {
            object,
            views,
            image_size,
            frozen,
            params: DVector::from_vec(x0),
        };
        let (solved, report) = lm::solve(problem, &self.options.lm)?;
        let x = solved.params;
        if !x.iter().all(|v| v.is_finite()) {
            return Err(CalibrationError::NonFinite);
        }

        let mut camera = camera_from_params(x.as_slice(), image_size);
        camera.rms = rms_from_cost(report.final_cost, object.len() * views.len());
        let poses = (0..views.len())
            .map(|v| {
                let off = INTRINSIC_PARAMS + POSE_PARAMS * v;
                pose_from_params(&x.as_slice()[off..off + POSE_PARAMS])
            })
            .collect();

        info!(
            "intrinsics: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}px ({} evaluations)",
            camera.fx, camera.fy, camera.cx, camera.cy, camera.rms, report.evaluations
        );
        Ok(IntrinsicCalibration {
            camera,
            poses,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_calib_core::synthetic::{project_points, CheckerboardPattern, StereoRig};

    fn synthetic_views(count: usize) -> (Vec<Point3<f64>>, Vec<Vec<Point2<f64>>>, CameraIntrinsics) {
        let rig = StereoRig::example();
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let object = pattern.inner_corners();
        let views = rig
            .board_poses(&pattern, 600.0, count)
            .iter()
            .map(|pose| project_points(&rig.left, pose, &object).expect("visible"))
            .collect();
        (object, views, rig.left)
    }

    #[test]
    fn recovers_distorted_camera() {
        let (object, views, truth) = synthetic_views(6);
        let calib = IntrinsicCalibrator::default()
            .calibrate(&object, &views, truth.image_size)
            .expect("calibration");
        let cam = calib.camera;
        assert!((cam.fx - truth.fx).abs() < 0.5, "fx {}", cam.fx);
        assert!((cam.fy - truth.fy).abs() < 0.5, "fy {}", cam.fy);
        assert!((cam.cx - truth.cx).abs() < 0.5, "cx {}", cam.cx);
        assert!((cam.cy - truth.cy).abs() < 0.5, "cy {}", cam.cy);
        assert!((cam.distortion.k1 - truth.distortion.k1).abs() < 5e-3);
        assert_eq!(cam.distortion.k3, 0.0);
        assert!(cam.rms < 1e-3, "rms {}", cam.rms);
        assert_eq!(calib.poses.len(), 6);
    }

    #[test]
    fn frozen_tangential_terms_stay_zero() {
        let (object, views, truth) = synthetic_views(4);
        let calib = IntrinsicCalibrator::new(IntrinsicCalibratorOptions {
            fix_tangential: true,
            ..Default::default()
        })
        .calibrate(&object, &views, truth.image_size)
        .expect("calibration");
        assert_eq!(calib.camera.distortion.p1, 0.0);
        assert_eq!(calib.camera.distortion.p2, 0.0);
    }

    #[test]
    fn rejects_single_view_and_short_views() {
        let (object, views, truth) = synthetic_views(2);
        let err = IntrinsicCalibrator::default()
            .calibrate(&object, &views[..1], truth.image_size)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::NotEnoughViews { got: 1, .. }));

        let mut short = views.clone();
        short[1].pop();
        let err = IntrinsicCalibrator::default()
            .calibrate(&object, &short, truth.image_size)
            .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::PointCountMismatch { view: 1, .. }
        ));
    }

    #[test]
    fn focal_init_is_close_on_pinhole_views() {
        let rig = StereoRig::example();
        let cam = CameraIntrinsics::pinhole(700.0, 700.0, 319.5, 239.5, rig.left.image_size);
        let pattern = CheckerboardPattern::new(9, 6, 25.0);
        let plane: Vec<Point2<f64>> = pattern
            .inner_corners()
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        let hs: Vec<Homography> = rig
            .board_poses(&pattern, 600.0, 4)
            .iter()
            .map(|pose| {
                let px = project_points(&cam, pose, &pattern.inner_corners()).expect("visible");
                estimate_homography(&plane, &px).expect("homography")
            })
            .collect();
        let (fx, fy) = initial_focal(&hs, cam.image_size, 319.5, 239.5);
        assert!((fx - 700.0).abs() < 1.0, "fx {fx}");
        assert!((fy - 700.0).abs() < 1.0, "fy {fy}");
    }
}

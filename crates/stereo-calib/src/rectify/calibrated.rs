//! Bouguet rectification from a calibrated rig.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Vector2, Vector3};
use stereo_calib_core::geometry::{rodrigues, rodrigues_inverse};
use stereo_calib_core::{CameraIntrinsics, ImageSize};

use super::{RectificationMode, RectificationTransform, ValidRoi};
use crate::error::RectifyError;

/// Samples per side of the grid used to bound the rectified raster.
const BORDER_GRID: usize = 9;

/// Axis-aligned rectangle with fractional corners.
#[derive(Clone, Copy, Debug)]
struct Rect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// Inner (fully valid) and outer (bounding) rectangles of the raster after
/// undistortion and rectification with `r` and `p`.
fn valid_rectangles(
    cam: &CameraIntrinsics,
    r: &Matrix3<f64>,
    p: &Matrix3<f64>,
    size: ImageSize,
) -> (Rect, Rect) {
    let n = BORDER_GRID;
    let (mut ix0, mut ix1, mut iy0, mut iy1) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);
    let (mut ox0, mut ox1, mut oy0, mut oy1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for y in 0..n {
        for x in 0..n {
            let px = Point2::new(
                (size.width * x) as f64 / (n - 1) as f64,
                (size.height * y) as f64 / (n - 1) as f64,
            );
            let q = cam.undistort_rectify_pixel(px, r, p);
            ox0 = ox0.min(q.x);
            ox1 = ox1.max(q.x);
            oy0 = oy0.min(q.y);
            oy1 = oy1.max(q.y);
            if x == 0 {
                ix0 = ix0.max(q.x);
            }
            if x == n - 1 {
                ix1 = ix1.min(q.x);
            }
            if y == 0 {
                iy0 = iy0.max(q.y);
            }
            if y == n - 1 {
                iy1 = iy1.min(q.y);
            }
        }
    }
    (
        Rect {
            x: ix0,
            y: iy0,
            w: ix1 - ix0,
            h: iy1 - iy0,
        },
        Rect {
            x: ox0,
            y: oy0,
            w: ox1 - ox0,
            h: oy1 - oy0,
        },
    )
}

fn camera_matrix(f: f64, c: Vector2<f64>) -> Matrix3<f64> {
    Matrix3::new(f, 0.0, c.x, 0.0, f, c.y, 0.0, 0.0, 1.0)
}

/// Scale factors that fit a rectangle into the raster around centre `c0`
/// (before scaling) and `c` (after): `[left, top, right, bottom]`.
fn fit_ratios(rect: &Rect, c0: Vector2<f64>, c: Vector2<f64>, size: ImageSize) -> [f64; 4] {
    let w = size.width as f64;
    let h = size.height as f64;
    [
        c.x / (c0.x - rect.x),
        c.y / (c0.y - rect.y),
        (w - 1.0 - c.x) / (rect.x + rect.w - c0.x),
        (h - 1.0 - c.y) / (rect.y + rect.h - c0.y),
    ]
}

/// Rectify a calibrated rig (`X_right = R X_left + T`).
///
/// Each camera is rotated half-way towards the other, then both are turned
/// so the baseline runs along x (or y when the rig is stacked). The new
/// cameras share one focal length and principal point, scaled by `alpha`
/// between the inscribed (0) and circumscribed (1) valid rectangles.
pub fn stereo_rectify(
    left: &CameraIntrinsics,
    right: &CameraIntrinsics,
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    size: ImageSize,
    alpha: f64,
) -> Result<RectificationTransform, RectifyError> {
    let om = rodrigues_inverse(r) * -0.5;
    let r_half = rodrigues(&om);
    let t_half = r_half * t;
    let baseline = t_half.norm();
    if baseline <= f64::EPSILON {
        return Err(RectifyError::ZeroBaseline);
    }

    let idx = if t_half.x.abs() > t_half.y.abs() { 0 } else { 1 };
    let c = t_half[idx];
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    let mut ww = t_half.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / baseline).acos() / nw;
    }
    let w_r = rodrigues(&ww);
    let r1 = w_r * r_half.transpose();
    let r2 = w_r * r_half;
    let t_new = r2 * t;

    let other = idx ^ 1;
    let mut fc = 0.5 * (left.matrix()[(other, other)] + right.matrix()[(other, other)]);

    let nx = size.width as f64;
    let ny = size.height as f64;
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(nx - 1.0, 0.0),
        Point2::new(0.0, ny - 1.0),
        Point2::new(nx - 1.0, ny - 1.0),
    ];
    let centred = camera_matrix(fc, Vector2::zeros());
    let mut cc = [Vector2::zeros(); 2];
    for (k, (cam, rk)) in [(left, &r1), (right, &r2)].into_iter().enumerate() {
        let mean = corners
            .iter()
            .map(|p| cam.undistort_rectify_pixel(*p, rk, &centred).coords)
            .sum::<Vector2<f64>>()
            / corners.len() as f64;
        cc[k] = Vector2::new((nx - 1.0) * 0.5, (ny - 1.0) * 0.5) - mean;
    }
    // Zero disparity at infinity: one shared principal point.
    let shared = (cc[0] + cc[1]) * 0.5;
    cc = [shared, shared];

    let (inner1, outer1) = valid_rectangles(left, &r1, &camera_matrix(fc, cc[0]), size);
    let (inner2, outer2) = valid_rectangles(right, &r2, &camera_matrix(fc, cc[1]), size);

    let cc0 = cc;
    let mut s = 1.0;
    if alpha >= 0.0 {
        let inner = fit_ratios(&inner1, cc0[0], cc[0], size)
            .into_iter()
            .chain(fit_ratios(&inner2, cc0[1], cc[1], size));
        let s0 = inner.fold(f64::MIN, f64::max);
        let outer = fit_ratios(&outer1, cc0[0], cc[0], size)
            .into_iter()
            .chain(fit_ratios(&outer2, cc0[1], cc[1], size));
        let s1 = outer.fold(f64::MAX, f64::min);
        s = s0 * (1.0 - alpha) + s1 * alpha;
        if !s.is_finite() || s <= 0.0 {
            log::warn!("rectification scale {s} is invalid, using 1");
            s = 1.0;
        }
    }
    fc *= s;

    let mut p1 = Matrix3x4::zeros();
    p1.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&camera_matrix(fc, cc[0]));
    let mut p2 = Matrix3x4::zeros();
    p2.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&camera_matrix(fc, cc[1]));
    p2[(idx, 3)] = t_new[idx] * fc;

    let roi = |inner: &Rect, c0: Vector2<f64>, c: Vector2<f64>| {
        ValidRoi::clipped(
            ((inner.x - c0.x) * s + c.x).ceil(),
            ((inner.y - c0.y) * s + c.y).ceil(),
            (inner.w * s).floor(),
            (inner.h * s).floor(),
            size,
        )
    };
    let roi1 = roi(&inner1, cc0[0], cc[0]);
    let roi2 = roi(&inner2, cc0[1], cc[1]);

    let t_idx = t_new[idx];
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -cc[0].x, //
        0.0, 1.0, 0.0, -cc[0].y, //
        0.0, 0.0, 0.0, fc, //
        0.0, 0.0, -1.0 / t_idx, (cc[0][idx] - cc[1][idx]) / t_idx,
    );

    Ok(RectificationTransform {
        mode: RectificationMode::Calibrated,
        image_size: size,
        r1,
        r2,
        p1,
        p2,
        q,
        roi1,
        roi2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rectify::tests::{max_row_error, synthetic_pairs};
    use approx::assert_relative_eq;
    use stereo_calib_core::synthetic::StereoRig;

    #[test]
    fn rotations_are_proper_and_baseline_is_horizontal() {
        let rig = StereoRig::example();
        let plan = stereo_rectify(&rig.left, &rig.right, &rig.rotation, &rig.translation, rig.left.image_size, 1.0)
            .expect("plan");
        assert_relative_eq!(plan.r1.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(plan.r2.determinant(), 1.0, epsilon = 1e-9);
        // Baseline purely along x after rectification.
        let t = plan.r2 * rig.translation;
        assert!(t.y.abs() < 1e-9 && t.z.abs() < 1e-9);
        assert_relative_eq!(plan.p2[(0, 3)], t.x * plan.p1[(0, 0)], epsilon = 1e-9);
        assert!(plan.p2[(0, 3)] < 0.0);
        assert_eq!(plan.p1.fixed_view::<3, 3>(0, 0), plan.p2.fixed_view::<3, 3>(0, 0));
        assert!(!plan.is_vertical());
    }

    #[test]
    fn q_reprojects_disparity_to_depth() {
        let rig = StereoRig::example();
        let plan = stereo_rectify(&rig.left, &rig.right, &rig.rotation, &rig.translation, rig.left.image_size, 1.0)
            .expect("plan");
        let f = plan.p1[(0, 0)];
        let tx = plan.p2[(0, 3)] / f;
        // A point 800 units in front of the rectified left camera on its axis.
        let z = 800.0;
        let disparity = -f * tx / z;
        let v = plan.q * nalgebra::Vector4::new(plan.p1[(0, 2)], plan.p1[(1, 2)], disparity, 1.0);
        assert_relative_eq!(v.z / v.w, z, epsilon = 1e-6);
    }

    #[test]
    fn alpha_zero_keeps_only_valid_pixels() {
        let rig = StereoRig::example();
        let size = rig.left.image_size;
        let full = stereo_rectify(&rig.left, &rig.right, &rig.rotation, &rig.translation, size, 1.0)
            .expect("alpha 1");
        let cropped = stereo_rectify(&rig.left, &rig.right, &rig.rotation, &rig.translation, size, 0.0)
            .expect("alpha 0");
        assert!(cropped.p1[(0, 0)] > full.p1[(0, 0)]);
        assert!(cropped.roi1.area() >= full.roi1.area());
        assert!(!full.roi1.is_empty() && !full.roi2.is_empty());

        let pairs = synthetic_pairs(&rig, 2);
        assert!(max_row_error(&cropped, &rig, &pairs) < 1e-3);
    }

    #[test]
    fn vertical_rig_is_detected() {
        let rig = StereoRig::example();
        let t = Vector3::new(0.5, -60.0, 1.0);
        let plan = stereo_rectify(&rig.left, &rig.right, &Matrix3::identity(), &t, rig.left.image_size, 1.0)
            .expect("plan");
        assert!(plan.is_vertical());
        assert_eq!(plan.p2[(0, 3)], 0.0);
    }

    #[test]
    fn zero_baseline_is_an_error() {
        let rig = StereoRig::example();
        let err = stereo_rectify(
            &rig.left,
            &rig.right,
            &Matrix3::identity(),
            &Vector3::zeros(),
            rig.left.image_size,
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, RectifyError::ZeroBaseline));
    }
}

//! Hartley rectification from point correspondences alone.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Point2, Vector3};
use stereo_calib_core::geometry::{skew, transform_point};
use stereo_calib_core::{CameraIntrinsics, ImageSize};

use super::fundamental::{epipolar_distances, estimate_fundamental};
use super::{projection_from_camera, RectificationMode, RectificationTransform, ValidRoi};
use crate::error::RectifyError;

/// Default epipolar outlier threshold in pixels.
pub const HARTLEY_THRESHOLD: f64 = 3.0;

/// Rectifying homographies `(H1, H2)` for a fundamental matrix with
/// `x_right^T F x_left = 0`.
///
/// `H2` sends the right epipole to infinity along x about the raster centre;
/// `H1` is the matching left homography that minimizes the horizontal
/// disparity of the given correspondences.
pub fn rectifying_homographies(
    f: &Matrix3<f64>,
    left: &[Point2<f64>],
    right: &[Point2<f64>],
    size: ImageSize,
) -> Result<(Matrix3<f64>, Matrix3<f64>), RectifyError> {
    let svd = f.svd(true, false);
    let u = svd.u.ok_or(RectifyError::Fundamental)?;
    let e2 = u.column(svd.singular_values.imin()).into_owned();

    let cx = ((size.width as f64 - 1.0) * 0.5).round();
    let cy = ((size.height as f64 - 1.0) * 0.5).round();
    let t = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let t_inv = Matrix3::new(1.0, 0.0, cx, 0.0, 1.0, cy, 0.0, 0.0, 1.0);

    let e = t * e2;
    let mirror = e.x < 0.0;
    let d = e.xy().norm().max(f64::EPSILON);
    let (a, b) = (e.x / d, e.y / d);
    let rot = Matrix3::new(a, b, 0.0, -b, a, 0.0, 0.0, 0.0, 1.0);
    let e = rot * e;
    let inv_f = if e.z.abs() < 1e-6 * e.x.abs() {
        0.0
    } else {
        -e.z / e.x
    };
    let k = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, inv_f, 0.0, 1.0);
    let mut h2 = t_inv * k * rot * t;

    let m = skew(&e2) * f + e2 * Vector3::new(1.0, 1.0, 1.0).transpose();
    let h0 = h2 * m;

    // Least-squares affine correction along x: a*x + b*y + c ~ x_right.
    let n = left.len();
    let mut lhs = DMatrix::<f64>::zeros(n, 3);
    let mut rhs = DVector::<f64>::zeros(n);
    for (i, (l, r)) in left.iter().zip(right).enumerate() {
        let pl = transform_point(&h0, *l);
        let pr = transform_point(&h2, *r);
        lhs[(i, 0)] = pl.x;
        lhs[(i, 1)] = pl.y;
        lhs[(i, 2)] = 1.0;
        rhs[i] = pr.x;
    }
    let x = lhs
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|_| RectifyError::Singular)?;
    let ha = Matrix3::new(x[0], x[1], x[2], 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
    let mut h1 = ha * h0;

    if mirror {
        let mm = Matrix3::new(-1.0, 0.0, 2.0 * cx, 0.0, -1.0, 2.0 * cy, 0.0, 0.0, 1.0);
        h1 = mm * h1;
        h2 = mm * h2;
    }
    if !(h1.iter().chain(h2.iter()).all(|v| v.is_finite())) {
        return Err(RectifyError::Singular);
    }
    Ok((h1, h2))
}

/// Rectify from undistorted pixel correspondences (each expressed with its
/// own camera matrix).
///
/// The fundamental matrix is re-estimated on the pooled points, pairs whose
/// epipolar distance exceeds `threshold` in either image are dropped, and the
/// homographies are turned into rotations `R = K^-1 H K` with `P = [K | 0]`.
pub fn stereo_rectify_uncalibrated(
    left_cam: &CameraIntrinsics,
    right_cam: &CameraIntrinsics,
    left: &[Point2<f64>],
    right: &[Point2<f64>],
    size: ImageSize,
    threshold: f64,
) -> Result<RectificationTransform, RectifyError> {
    if left.len() < 8 || right.len() != left.len() {
        return Err(RectifyError::NotEnoughPoints {
            got: left.len().min(right.len()),
        });
    }
    let f = estimate_fundamental(left, right).ok_or(RectifyError::Fundamental)?;

    let (inl, inr): (Vec<_>, Vec<_>) = left
        .iter()
        .zip(right)
        .filter(|(l, r)| {
            threshold <= 0.0
                || matches!(
                    epipolar_distances(&f, **l, **r),
                    Some((d1, d2)) if d1 <= threshold && d2 <= threshold
                )
        })
        .map(|(l, r)| (*l, *r))
        .unzip();
    log::debug!("hartley: {} of {} correspondences kept", inl.len(), left.len());
    if inl.len() < 8 {
        return Err(RectifyError::NotEnoughPoints { got: inl.len() });
    }

    let (h1, h2) = rectifying_homographies(&f, &inl, &inr, size)?;

    let k1 = left_cam.matrix();
    let k2 = right_cam.matrix();
    let k1_inv = k1.try_inverse().ok_or(RectifyError::Singular)?;
    let k2_inv = k2.try_inverse().ok_or(RectifyError::Singular)?;
    let r1 = k1_inv * h1 * k1;
    let r2 = k2_inv * h2 * k2;

    let p1 = projection_from_camera(&k1);
    let p2 = projection_from_camera(&k2);
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -k1[(0, 2)], //
        0.0, 1.0, 0.0, -k1[(1, 2)], //
        0.0, 0.0, 0.0, k1[(0, 0)], //
        0.0, 0.0, 0.0, 0.0,
    );

    Ok(RectificationTransform {
        mode: RectificationMode::Hartley,
        image_size: size,
        r1,
        r2,
        p1,
        p2,
        q,
        roi1: ValidRoi::full(size),
        roi2: ValidRoi::full(size),
    })
}

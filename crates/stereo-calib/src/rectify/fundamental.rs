//! Normalized eight-point fundamental matrix and epipolar distances.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use stereo_calib_core::{normalize_points, null_vector};

/// Fit `F` with `x_right^T F x_left = 0` from at least 8 correspondences.
///
/// Points are Hartley-normalized before the linear solve and rank 2 is
/// enforced on the result. The returned matrix is scaled so `F[2,2] = 1`
/// when that entry is not close to zero, otherwise to unit Frobenius norm.
pub fn estimate_fundamental(left: &[Point2<f64>], right: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = left.len();
    if n < 8 || right.len() != n {
        return None;
    }
    let (l, tl) = normalize_points(left);
    let (r, tr) = normalize_points(right);

    let mut a = DMatrix::<f64>::zeros(n, 9);
    for (i, (p, q)) in l.iter().zip(&r).enumerate() {
        let row = [
            q.x * p.x,
            q.x * p.y,
            q.x,
            q.y * p.x,
            q.y * p.y,
            q.y,
            p.x,
            p.y,
            1.0,
        ];
        for (j, v) in row.iter().enumerate() {
            a[(i, j)] = *v;
        }
    }
    let f = null_vector(&a)?;
    let f = Matrix3::from_row_slice(&f);

    let svd = f.svd(true, true);
    let u = svd.u?;
    let vt = svd.v_t?;
    let mut s = svd.singular_values;
    let weakest = s.imin();
    s[weakest] = 0.0;
    let f = u * Matrix3::from_diagonal(&s) * vt;

    let mut f = tr.transpose() * f * tl;
    if f[(2, 2)].abs() > 1e-12 * f.norm() {
        f /= f[(2, 2)];
    } else {
        let n = f.norm();
        if n <= f64::EPSILON {
            return None;
        }
        f /= n;
    }
    f.iter().all(|v| v.is_finite()).then_some(f)
}

/// Distances `(d(x_right, F x_left), d(x_left, F^T x_right))` in pixels.
/// `None` when either epipolar line is degenerate.
pub fn epipolar_distances(
    f: &Matrix3<f64>,
    left: Point2<f64>,
    right: Point2<f64>,
) -> Option<(f64, f64)> {
    let xl = Vector3::new(left.x, left.y, 1.0);
    let xr = Vector3::new(right.x, right.y, 1.0);
    let line_r = f * xl;
    let line_l = f.transpose() * xr;
    let nr = line_r.xy().norm();
    let nl = line_l.xy().norm();
    if nr <= f64::EPSILON || nl <= f64::EPSILON {
        return None;
    }
    Some((xr.dot(&line_r).abs() / nr, xl.dot(&line_l).abs() / nl))
}

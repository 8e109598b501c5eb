//! Rotation and rigid-motion helpers.

use nalgebra::{
    Isometry3, Matrix3, Point2, Rotation3, Translation3, UnitQuaternion, Vector3, Vector6,
};

use crate::Homography;

/// Rotation matrix from a Rodrigues (axis * angle) vector.
#[inline]
pub fn rodrigues(v: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*v).into_inner()
}

/// Rodrigues vector of a rotation matrix. The matrix is re-orthonormalized first.
pub fn rodrigues_inverse(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(r).scaled_axis()
}

/// Cross-product matrix `[v]x` so that `[v]x * w = v x w`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Closest rotation matrix in the Frobenius sense.
pub fn nearest_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let vt = svd.v_t?;
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * vt;
    }
    Some(r)
}

/// Pose packed as `[rx, ry, rz, tx, ty, tz]` (Rodrigues + translation).
pub fn pose_to_params(pose: &Isometry3<f64>) -> Vector6<f64> {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    Vector6::new(r.x, r.y, r.z, t.x, t.y, t.z)
}

pub fn pose_from_params(p: &[f64]) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(p[3], p[4], p[5]),
        UnitQuaternion::from_scaled_axis(Vector3::new(p[0], p[1], p[2])),
    )
}

pub fn pose_from_rt(r: &Matrix3<f64>, t: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(*t),
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(r)),
    )
}

/// Decompose a plane-to-image homography expressed in normalized camera
/// coordinates (`K^-1 * H`) into the board pose `[r1 r2 t]`.
///
/// The board plane is `z = 0`; the returned pose maps board points into the
/// camera frame and keeps the board in front of the camera.
pub fn pose_from_normalized_homography(h: &Homography) -> Option<Isometry3<f64>> {
    let m = h.h;
    let h1 = m.column(0).into_owned();
    let h2 = m.column(1).into_owned();
    let h3 = m.column(2).into_owned();

    let n1 = h1.norm();
    let n2 = h2.norm();
    if n1 < 1e-12 || n2 < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (n1 + n2);
    if (h3 * lambda).z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;

    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let r = nearest_rotation(&approx)?;
    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(pose_from_rt(&r, &t))
}

/// Chordal mean of rotations.
pub fn mean_rotation(rotations: &[Matrix3<f64>]) -> Option<Matrix3<f64>> {
    if rotations.is_empty() {
        return None;
    }
    let sum = rotations
        .iter()
        .fold(Matrix3::zeros(), |acc: Matrix3<f64>, r| acc + r);
    nearest_rotation(&sum)
}

/// Map a pixel through a 3x3 projective transform.
#[inline]
pub fn transform_point(h: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x / v.z, v.y / v.z)
}

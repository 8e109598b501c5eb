//! Pinhole camera with Brown-Conrady lens distortion.
//!
//! Conventions follow the usual computer-vision layout: a camera-frame point
//! `(X, Y, Z)` is projected to normalized coordinates `(X/Z, Y/Z)`, distorted,
//! and mapped to pixels with `u = fx * xd + cx`, `v = fy * yd + cy`.

use crate::ImageSize;
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Default fixed-point iteration count for [`Distortion::undistort`].
pub const UNDISTORT_ITERS: usize = 20;

/// Radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    #[serde(default)]
    pub k3: f64,
}

impl Distortion {
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64) -> Self {
        Self {
            k1,
            k2,
            p1,
            p2,
            k3: 0.0,
        }
    }

    /// Coefficients in `[k1, k2, p1, p2, k3]` order.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(d: [f64; 5]) -> Self {
        Self {
            k1: d[0],
            k2: d[1],
            p1: d[2],
            p2: d[3],
            k3: d[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&c| c == 0.0)
    }

    /// Apply distortion to a normalized image point.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(xd, yd)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, pd: Point2<f64>, iters: usize) -> Point2<f64> {
        if self.is_zero() {
            return pd;
        }
        let (x0, y0) = (pd.x, pd.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..iters {
            let r2 = x * x + y * y;
            let icdist = 1.0 / (1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2);
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (x0 - dx) * icdist;
            y = (y0 - dy) * icdist;
        }
        Point2::new(x, y)
    }
}

/// Fitted intrinsic model of one camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: Distortion,
    /// Raster the model was fitted on.
    pub image_size: ImageSize,
    /// RMS reprojection error of the fit in pixels (0 for hand-built models).
    #[serde(default)]
    pub rms: f64,
}

impl CameraIntrinsics {
    /// Distortion-free camera.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64, image_size: ImageSize) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: Distortion::default(),
            image_size,
            rms: 0.0,
        }
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// The 3x3 camera matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(k: &Matrix3<f64>, distortion: Distortion, image_size: ImageSize) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            distortion,
            image_size,
            rms: 0.0,
        }
    }

    /// Pixel coordinates of a normalized point, distortion applied.
    #[inline]
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        let d = self.distortion.distort(p);
        Point2::new(self.fx * d.x + self.cx, self.fy * d.y + self.cy)
    }

    /// Project a camera-frame point. Returns `None` behind the camera.
    #[inline]
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(self.normalized_to_pixel(Point2::new(p.x / p.z, p.y / p.z)))
    }

    /// Undistorted normalized coordinates of a raw pixel.
    pub fn pixel_to_normalized(&self, px: Point2<f64>) -> Point2<f64> {
        let pd = Point2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy);
        self.distortion.undistort(pd, UNDISTORT_ITERS)
    }

    /// Unit-depth viewing ray through a raw pixel.
    pub fn pixel_ray(&self, px: Point2<f64>) -> Vector3<f64> {
        let n = self.pixel_to_normalized(px);
        Vector3::new(n.x, n.y, 1.0)
    }

    /// Remove distortion from a pixel and re-express it with this camera's
    /// own matrix (`P = K`).
    pub fn undistort_pixel(&self, px: Point2<f64>) -> Point2<f64> {
        let n = self.pixel_to_normalized(px);
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    /// Undistort a pixel, rotate the ray by `r` and project it through the
    /// 3x3 part of `p`.
    pub fn undistort_rectify_pixel(
        &self,
        px: Point2<f64>,
        r: &Matrix3<f64>,
        p: &Matrix3<f64>,
    ) -> Point2<f64> {
        let ray = r * self.pixel_ray(px);
        let q = p * (ray / ray.z);
        Point2::new(q.x / q.z, q.y / q.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::pinhole(800.0, 790.0, 320.0, 240.0, ImageSize::new(640, 480))
            .with_distortion(Distortion::new(-0.12, 0.03, 0.001, -0.0005))
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = camera().distortion;
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(0.2, -0.1),
            Point2::new(-0.35, 0.25),
        ] {
            let back = d.undistort(d.distort(p), UNDISTORT_ITERS);
            assert_relative_eq!(back.x, p.x, epsilon = 1e-7);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-7);
        }
    }

    #[test]
    fn pixel_round_trip_through_projection() {
        let cam = camera();
        let pt = Point3::new(0.1, -0.05, 1.2);
        let px = cam.project(&pt).expect("in front");
        let ray = cam.pixel_ray(px);
        assert_relative_eq!(ray.x, pt.x / pt.z, epsilon = 1e-7);
        assert_relative_eq!(ray.y, pt.y / pt.z, epsilon = 1e-7);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        assert!(camera().project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn identity_rectification_is_plain_undistortion() {
        let cam = camera();
        let px = Point2::new(100.0, 60.0);
        let a = cam.undistort_pixel(px);
        let b = cam.undistort_rectify_pixel(px, &Matrix3::identity(), &cam.matrix());
        assert_relative_eq!(a.x, b.x, epsilon = 1e-9);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-9);
    }
}

//! Synthetic stereo rigs and rendered chessboard views.
//!
//! Used by the test suites of the workspace crates and handy for quick
//! experiments without real captures.

use crate::{CameraIntrinsics, Distortion, GrayImage, ImageSize};
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Translation3, UnitQuaternion, Vector3};

/// Checkerboard described by its inner-corner lattice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckerboardPattern {
    pub inner_cols: usize,
    pub inner_rows: usize,
    pub square_size: f64,
    /// White border around the outer squares, in squares.
    pub margin: f64,
}

impl CheckerboardPattern {
    pub fn new(inner_cols: usize, inner_rows: usize, square_size: f64) -> Self {
        Self {
            inner_cols,
            inner_rows,
            square_size,
            margin: 0.75,
        }
    }

    /// Inner corners on the `z = 0` plane, row-major (column fastest).
    pub fn inner_corners(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.inner_rows)
            .flat_map(|j| (0..self.inner_cols).map(move |k| Point3::new(k as f64 * s, j as f64 * s, 0.0)))
            .collect()
    }

    /// Centre of the inner-corner lattice on the board plane.
    pub fn center(&self) -> Point3<f64> {
        let s = self.square_size;
        Point3::new(
            (self.inner_cols as f64 - 1.0) * s * 0.5,
            (self.inner_rows as f64 - 1.0) * s * 0.5,
            0.0,
        )
    }

    /// Reflectance at a board-plane point, `None` outside the printed area.
    fn shade(&self, x: f64, y: f64) -> Option<f64> {
        let s = self.square_size;
        let lo = -(1.0 + self.margin) * s;
        let hi_x = (self.inner_cols as f64 + self.margin) * s;
        let hi_y = (self.inner_rows as f64 + self.margin) * s;
        if x < lo || y < lo || x > hi_x || y > hi_y {
            return None;
        }
        let a = (x / s).floor() as i64;
        let b = (y / s).floor() as i64;
        let on_squares = a >= -1 && b >= -1 && a < self.inner_cols as i64 && b < self.inner_rows as i64;
        if on_squares && (a + b).rem_euclid(2) == 0 {
            Some(0.1)
        } else {
            Some(0.9)
        }
    }
}

/// Two cameras and the rigid motion taking left-camera points to the right camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoRig {
    pub left: CameraIntrinsics,
    pub right: CameraIntrinsics,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl StereoRig {
    /// A mildly distorted 640x480 rig with a 60 mm horizontal baseline.
    pub fn example() -> Self {
        let size = ImageSize::new(640, 480);
        let left = CameraIntrinsics::pinhole(820.0, 820.0, 318.0, 242.0, size)
            .with_distortion(Distortion::new(-0.08, 0.05, 0.0008, -0.0005));
        let right = CameraIntrinsics::pinhole(820.0, 820.0, 326.0, 236.0, size)
            .with_distortion(Distortion::new(-0.06, 0.03, -0.0004, 0.0006));
        let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(0.01, -0.03, 0.005))
            .to_rotation_matrix()
            .into_inner();
        // Right camera centre sits 60 mm along +x of the left camera.
        let centre = Vector3::new(60.0, 0.8, -1.5);
        let translation = -(rotation * centre);
        Self {
            left,
            right,
            rotation,
            translation,
        }
    }

    pub fn right_from_left(&self) -> Isometry3<f64> {
        crate::geometry::pose_from_rt(&self.rotation, &self.translation)
    }

    /// Baseline midpoint in the left camera frame.
    pub fn midpoint(&self) -> Vector3<f64> {
        let right_centre = -(self.rotation.transpose() * self.translation);
        right_centre * 0.5
    }

    /// Board poses in the left camera frame that keep the board in both views.
    pub fn board_poses(
        &self,
        pattern: &CheckerboardPattern,
        distance: f64,
        count: usize,
    ) -> Vec<Isometry3<f64>> {
        board_poses(pattern, self.midpoint(), distance, count)
    }
}

/// Tilted board poses (board frame to camera frame) around `target`.
///
/// The board axes stay roughly aligned with the image axes, so the detected
/// corner order matches [`CheckerboardPattern::inner_corners`].
pub fn board_poses(
    pattern: &CheckerboardPattern,
    target: Vector3<f64>,
    distance: f64,
    count: usize,
) -> Vec<Isometry3<f64>> {
    const TILTS: [[f64; 6]; 8] = [
        [0.30, 0.02, 0.00, 0.0, 0.0, 0.0],
        [-0.28, -0.04, 0.03, 8.0, -6.0, 30.0],
        [0.03, 0.32, -0.02, -10.0, 4.0, -20.0],
        [-0.02, -0.30, 0.04, 6.0, 8.0, 10.0],
        [0.20, 0.22, 0.06, -6.0, -8.0, 40.0],
        [-0.22, 0.20, -0.05, 10.0, 6.0, -30.0],
        [0.24, -0.18, 0.08, -8.0, 10.0, 20.0],
        [-0.16, -0.24, -0.07, 4.0, -10.0, -10.0],
    ];
    let c = pattern.center().coords;
    (0..count)
        .map(|i| {
            let p = TILTS[i % TILTS.len()];
            let round = (i / TILTS.len()) as f64;
            let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(p[0], p[1], p[2]));
            let where_to = target
                + Vector3::new(p[3] + 5.0 * round, p[4] - 5.0 * round, distance + p[5]);
            let translation = where_to - rotation * c;
            Isometry3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Project board points through a camera. `None` if any point is behind it.
pub fn project_points(
    camera: &CameraIntrinsics,
    cam_from_board: &Isometry3<f64>,
    points: &[Point3<f64>],
) -> Option<Vec<Point2<f64>>> {
    points
        .iter()
        .map(|p| camera.project(&(cam_from_board * p)))
        .collect()
}

/// Render a checkerboard seen by `camera`, with `supersample^2` samples per pixel.
///
/// Pixel `(x, y)` covers `[x - 0.5, x + 0.5]`, so projected corner
/// coordinates are directly comparable to detections.
pub fn render_checkerboard(
    camera: &CameraIntrinsics,
    cam_from_board: &Isometry3<f64>,
    pattern: &CheckerboardPattern,
    supersample: usize,
) -> GrayImage {
    let n = supersample.max(1);
    let board_from_cam = cam_from_board.inverse();
    let origin = board_from_cam.translation.vector;
    let rot = board_from_cam.rotation;
    let ImageSize { width, height } = camera.image_size;
    let background = 0.45;

    GrayImage::from_fn(width, height, |x, y| {
        let mut acc = 0.0;
        for sy in 0..n {
            for sx in 0..n {
                let ox = (sx as f64 + 0.5) / n as f64 - 0.5;
                let oy = (sy as f64 + 0.5) / n as f64 - 0.5;
                let ray = rot * camera.pixel_ray(Point2::new(x as f64 + ox, y as f64 + oy));
                let lambda = -origin.z / ray.z;
                let value = if ray.z.abs() > 1e-12 && lambda > 0.0 {
                    let hit = origin + ray * lambda;
                    pattern.shade(hit.x, hit.y).unwrap_or(background)
                } else {
                    background
                };
                acc += value;
            }
        }
        (acc / (n * n) as f64 * 255.0).round().clamp(0.0, 255.0) as u8
    })
}

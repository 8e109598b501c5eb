//! JSON records for calibration results.
//!
//! Matrices are stored row-major as nested arrays under the conventional
//! short names (`M1`, `D1`, `R`, `T`, `P1`, `Q`, ...).

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Matrix3x4, Matrix4, SMatrix, Vector3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stereo_calib_core::{CameraIntrinsics, Distortion, ImageSize};

use crate::error::PersistenceError;
use crate::extrinsics::StereoExtrinsics;
use crate::rectify::RectificationTransform;

fn to_rows<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> [[f64; C]; R] {
    let mut out = [[0.0; C]; R];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    out
}

fn from_rows<const R: usize, const C: usize>(rows: &[[f64; C]; R]) -> SMatrix<f64, R, C> {
    SMatrix::from_fn(|r, c| rows[r][c])
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_pretty<T: Serialize>(value: &T, path: &Path) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Camera matrices and distortion of both cameras.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsRecord {
    #[serde(rename = "M1")]
    pub m1: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    #[serde(rename = "D1")]
    pub d1: [f64; 5],
    #[serde(rename = "M2")]
    pub m2: [[f64; 3]; 3],
    #[serde(rename = "D2")]
    pub d2: [f64; 5],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageSize>,
}

impl IntrinsicsRecord {
    pub fn new(left: &CameraIntrinsics, right: &CameraIntrinsics) -> Self {
        Self {
            m1: to_rows(&left.matrix()),
            d1: left.distortion.to_array(),
            m2: to_rows(&right.matrix()),
            d2: right.distortion.to_array(),
            image_size: Some(left.image_size),
        }
    }

    /// Rebuild both camera models. A record without a size yields `0x0`.
    pub fn cameras(&self) -> (CameraIntrinsics, CameraIntrinsics) {
        let size = self.image_size.unwrap_or(ImageSize::new(0, 0));
        (
            CameraIntrinsics::from_matrix(&from_rows(&self.m1), Distortion::from_array(self.d1), size),
            CameraIntrinsics::from_matrix(&from_rows(&self.m2), Distortion::from_array(self.d2), size),
        )
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        read_json(path.as_ref())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        write_pretty(self, path.as_ref())
    }
}

/// Relative motion and rectification of the rig.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsRecord {
    #[serde(rename = "R")]
    pub r: [[f64; 3]; 3],
    #[serde(rename = "T")]
    pub t: [f64; 3],
    #[serde(rename = "R1")]
    pub r1: [[f64; 3]; 3],
    #[serde(rename = "R2")]
    pub r2: [[f64; 3]; 3],
    #[serde(rename = "P1")]
    pub p1: [[f64; 4]; 3],
    #[serde(rename = "P2")]
    pub p2: [[f64; 4]; 3],
    #[serde(rename = "Q")]
    pub q: [[f64; 4]; 4],
}

impl ExtrinsicsRecord {
    pub fn new(extrinsics: &StereoExtrinsics, plan: &RectificationTransform) -> Self {
        let t = extrinsics.translation;
        Self {
            r: to_rows(&extrinsics.rotation),
            t: [t.x, t.y, t.z],
            r1: to_rows(&plan.r1),
            r2: to_rows(&plan.r2),
            p1: to_rows(&plan.p1),
            p2: to_rows(&plan.p2),
            q: to_rows(&plan.q),
        }
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        from_rows(&self.r)
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::from(self.t)
    }

    pub fn rectification(&self) -> (Matrix3<f64>, Matrix3<f64>, Matrix3x4<f64>, Matrix3x4<f64>) {
        (
            from_rows(&self.r1),
            from_rows(&self.r2),
            from_rows(&self.p1),
            from_rows(&self.p2),
        )
    }

    pub fn disparity_to_depth(&self) -> Matrix4<f64> {
        from_rows(&self.q)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        read_json(path.as_ref())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        write_pretty(self, path.as_ref())
    }
}

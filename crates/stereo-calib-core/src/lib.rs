//! Core types and utilities for stereo calibration.
//!
//! This crate is small and purely geometric: gray image views, plane
//! homographies, the pinhole + Brown-Conrady camera model, rotation helpers
//! and a Levenberg-Marquardt driver over `levenberg-marquardt`. It does *not* know about any
//! concrete target detector or image file format.

mod camera;
mod corner;
pub mod geometry;
mod homography;
mod image;
pub mod lm;
mod logger;
pub mod synthetic;

pub use camera::{CameraIntrinsics, Distortion, UNDISTORT_ITERS};
pub use corner::{Corner, GridCoords};
pub use homography::{estimate_homography, normalize_points, null_vector, Homography};
pub use image::{
    sample_bilinear, sample_bilinear_clamped, sample_bilinear_u8, upscale_bilinear, GrayImage,
    GrayImageView, ImageSize,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};

//! Dense remap tables and image resampling.

use nalgebra::{Matrix3, Point2, Vector3};
use stereo_calib_core::{sample_bilinear_u8, CameraIntrinsics, GrayImage, GrayImageView, ImageSize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{CameraSide, RectifyError};
use crate::rectify::RectificationTransform;

/// Per destination pixel, the fractional source coordinate to sample.
///
/// Entries that have no source (rays parallel to the image plane) are NaN.
#[derive(Clone, Debug, PartialEq)]
pub struct RemapTable {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl RemapTable {
    /// Every pixel maps to itself.
    pub fn identity(size: ImageSize) -> Self {
        let n = size.width * size.height;
        let mut map_x = Vec::with_capacity(n);
        let mut map_y = Vec::with_capacity(n);
        for y in 0..size.height {
            for x in 0..size.width {
                map_x.push(x as f32);
                map_y.push(y as f32);
            }
        }
        Self {
            width: size.width,
            height: size.height,
            map_x,
            map_y,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    /// Source coordinate for destination pixel `(x, y)`.
    pub fn get(&self, x: usize, y: usize) -> Option<Point2<f32>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y * self.width + x;
        let p = Point2::new(self.map_x[i], self.map_y[i]);
        (p.x.is_finite() && p.y.is_finite()).then_some(p)
    }
}

fn fill_row(
    cam: &CameraIntrinsics,
    inv: &Matrix3<f64>,
    y: usize,
    row_x: &mut [f32],
    row_y: &mut [f32],
) {
    for (x, (mx, my)) in row_x.iter_mut().zip(row_y.iter_mut()).enumerate() {
        let ray = inv * Vector3::new(x as f64, y as f64, 1.0);
        if ray.z.abs() <= 1e-12 {
            *mx = f32::NAN;
            *my = f32::NAN;
            continue;
        }
        let src = cam.normalized_to_pixel(Point2::new(ray.x / ray.z, ray.y / ray.z));
        *mx = src.x as f32;
        *my = src.y as f32;
    }
}

/// Table taking a rectified pixel back to the raw image of `cam`:
/// `(P R)^-1`, distortion, then `K`. `p` is the 3x3 block of the new projection.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(width = size.width, height = size.height))
)]
pub fn build_remap_table(
    cam: &CameraIntrinsics,
    r: &Matrix3<f64>,
    p: &Matrix3<f64>,
    size: ImageSize,
) -> Result<RemapTable, RectifyError> {
    let inv = (p * r).try_inverse().ok_or(RectifyError::Singular)?;
    let n = size.width * size.height;
    let mut map_x = vec![0.0f32; n];
    let mut map_y = vec![0.0f32; n];
    if n > 0 {
        #[cfg(feature = "rayon")]
        map_x
            .par_chunks_mut(size.width)
            .zip(map_y.par_chunks_mut(size.width))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| fill_row(cam, &inv, y, row_x, row_y));
        #[cfg(not(feature = "rayon"))]
        map_x
            .chunks_mut(size.width)
            .zip(map_y.chunks_mut(size.width))
            .enumerate()
            .for_each(|(y, (row_x, row_y))| fill_row(cam, &inv, y, row_x, row_y));
    }
    Ok(RemapTable {
        width: size.width,
        height: size.height,
        map_x,
        map_y,
    })
}

/// Resample `src` through `table` with bilinear interpolation. Samples that
/// fall outside the source read as 0.
pub fn rectify_image(src: &GrayImageView<'_>, table: &RemapTable) -> GrayImage {
    let mut out = GrayImage::new(table.width, table.height);
    if table.width == 0 {
        return out;
    }
    let fill = |(y, row): (usize, &mut [u8])| {
        let off = y * table.width;
        for (x, px) in row.iter_mut().enumerate() {
            let sx = table.map_x[off + x];
            let sy = table.map_y[off + x];
            *px = if sx.is_finite() && sy.is_finite() {
                sample_bilinear_u8(src, sx, sy)
            } else {
                0
            };
        }
    };
    #[cfg(feature = "rayon")]
    out.data.par_chunks_mut(table.width).enumerate().for_each(fill);
    #[cfg(not(feature = "rayon"))]
    out.data.chunks_mut(table.width).enumerate().for_each(fill);
    out
}

/// Remap tables for both cameras of a rectification plan.
#[derive(Clone, Debug, PartialEq)]
pub struct RectificationMaps {
    pub left: RemapTable,
    pub right: RemapTable,
}

impl RectificationMaps {
    pub fn build(
        left: &CameraIntrinsics,
        right: &CameraIntrinsics,
        plan: &RectificationTransform,
    ) -> Result<Self, RectifyError> {
        let size = plan.image_size;
        Ok(Self {
            left: build_remap_table(
                left,
                plan.rotation(CameraSide::Left),
                &plan.projection(CameraSide::Left),
                size,
            )?,
            right: build_remap_table(
                right,
                plan.rotation(CameraSide::Right),
                &plan.projection(CameraSide::Right),
                size,
            )?,
        })
    }

    pub fn rectify_pair(
        &self,
        left: &GrayImageView<'_>,
        right: &GrayImageView<'_>,
    ) -> (GrayImage, GrayImage) {
        (rectify_image(left, &self.left), rectify_image(right, &self.right))
    }
}

//! Subpixel saddle refinement.
//!
//! At the true corner `q`, every image gradient `g(p)` inside a small window
//! is orthogonal to `p - q`. Each iteration solves the weighted normal
//! equations `sum(w g g^T) q = sum(w g g^T p)` around the current estimate.

use crate::params::SubPixParams;
use nalgebra::Point2;
use stereo_calib_core::{sample_bilinear_clamped, GrayImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

fn gaussian_weights(half: usize) -> Vec<f32> {
    let n = 2 * half + 1;
    let mut axis = Vec::with_capacity(n);
    for k in 0..n {
        let t = (k as f32 - half as f32) / half.max(1) as f32;
        axis.push((-t * t).exp());
    }
    let mut mask = Vec::with_capacity(n * n);
    for wy in &axis {
        for wx in &axis {
            mask.push(wx * wy);
        }
    }
    mask
}

fn refine_one(
    img: &GrayImageView<'_>,
    start: Point2<f32>,
    params: &SubPixParams,
    mask: &[f32],
) -> Point2<f32> {
    let half = params.half_window as i32;
    let n = 2 * half + 1;
    let eps2 = params.epsilon * params.epsilon;
    let (w, h) = (img.width as f32, img.height as f32);
    let sample = |x: f32, y: f32| sample_bilinear_clamped(img, x, y);

    let mut c = start;
    for _ in 0..params.max_iters.max(1) {
        let (mut a, mut b, mut cc, mut bb1, mut bb2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);

        for iy in 0..n {
            let py = (iy - half) as f32;
            for ix in 0..n {
                let px = (ix - half) as f32;
                let m = mask[(iy * n + ix) as usize] as f64;
                let (x, y) = (c.x + px, c.y + py);
                let gx = (sample(x + 1.0, y) - sample(x - 1.0, y)) as f64;
                let gy = (sample(x, y + 1.0) - sample(x, y - 1.0)) as f64;

                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;
                a += gxx;
                b += gxy;
                cc += gyy;
                bb1 += gxx * px as f64 + gxy * py as f64;
                bb2 += gxy * px as f64 + gyy * py as f64;
            }
        }

        let det = a * cc - b * b;
        if det.abs() <= f64::EPSILON * (a * cc).abs().max(1.0) {
            break;
        }
        let scale = 1.0 / det;
        let dx = (cc * bb1 - b * bb2) * scale;
        let dy = (a * bb2 - b * bb1) * scale;
        let next = Point2::new(c.x + dx as f32, c.y + dy as f32);
        let moved2 = (dx * dx + dy * dy) as f32;
        c = next;

        if c.x < 0.0 || c.x >= w || c.y < 0.0 || c.y >= h || moved2 <= eps2 {
            break;
        }
    }

    let limit = params.half_window as f32;
    if !c.x.is_finite()
        || !c.y.is_finite()
        || (c.x - start.x).abs() > limit
        || (c.y - start.y).abs() > limit
    {
        return start;
    }
    c
}

/// Refine corner estimates in place. Points that drift further than the
/// window from their seed are restored to the seed.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, points, params), fields(points = points.len()))
)]
pub fn refine_corners(img: &GrayImageView<'_>, points: &mut [Point2<f32>], params: &SubPixParams) {
    let mask = gaussian_weights(params.half_window);
    for p in points.iter_mut() {
        *p = refine_one(img, *p, params, &mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_calib_core::GrayImage;

    /// Anti-aliased X-junction at a fractional position.
    fn junction(cx: f32, cy: f32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let mut acc = 0.0;
            for sy in 0..4 {
                for sx in 0..4 {
                    let u = x as f32 - 0.5 + (sx as f32 + 0.5) / 4.0 - cx;
                    let v = y as f32 - 0.5 + (sy as f32 + 0.5) / 4.0 - cy;
                    acc += if (u < 0.0) == (v < 0.0) { 30.0 } else { 220.0 };
                }
            }
            (acc / 16.0) as u8
        })
    }

    #[test]
    fn converges_to_fractional_junction() {
        let img = junction(31.3, 30.6);
        let mut pts = [Point2::new(33.0f32, 29.0)];
        refine_corners(&img.view(), &mut pts, &SubPixParams::default());
        assert!((pts[0].x - 31.3).abs() < 0.05, "{:?}", pts[0]);
        assert!((pts[0].y - 30.6).abs() < 0.05, "{:?}", pts[0]);
    }

    #[test]
    fn flat_patch_keeps_seed() {
        let img = GrayImage::from_fn(40, 40, |_, _| 90);
        let mut pts = [Point2::new(20.0f32, 18.5)];
        refine_corners(&img.view(), &mut pts, &SubPixParams::default());
        assert_eq!(pts[0], Point2::new(20.0, 18.5));
    }
}

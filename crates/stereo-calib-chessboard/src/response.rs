//! ChESS corners from `chess-corners`, adapted into [`stereo_calib_core::Corner`].

use crate::params::ResponseParams;
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use log::warn;
use nalgebra::Point2;
use stereo_calib_core::{Corner, GrayImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Single-scale `chess-corners` configuration for the given response settings.
pub fn chess_config(params: &ResponseParams) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = params.threshold_rel;
    cfg.params.nms_radius = params.nms_radius;
    cfg
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: c.orientation,
        strength: c.response,
    }
}

/// Detect X-junction corners in a grayscale view.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(width = img.width, height = img.height))
)]
pub fn detect_corners(img: &GrayImageView<'_>, params: &ResponseParams) -> Vec<Corner> {
    let (Ok(w), Ok(h)) = (u32::try_from(img.width), u32::try_from(img.height)) else {
        warn!("image {}x{} too large for ChESS", img.width, img.height);
        return Vec::new();
    };
    let Some(buf) = image::GrayImage::from_raw(w, h, img.data.to_vec()) else {
        warn!("grayscale buffer does not match {w}x{h}");
        return Vec::new();
    };
    find_chess_corners_image(&buf, &chess_config(params))
        .iter()
        .map(adapt_chess_corner)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_calib_core::GrayImage;

    const SQUARE: usize = 30;

    /// `cols x rows` squares with a white margin of one square.
    fn checker(cols: usize, rows: usize) -> GrayImage {
        GrayImage::from_fn((cols + 2) * SQUARE, (rows + 2) * SQUARE, |x, y| {
            let (i, j) = (x / SQUARE, y / SQUARE);
            let inside = (1..=cols).contains(&i) && (1..=rows).contains(&j);
            if inside && (i + j) % 2 == 0 {
                30
            } else {
                220
            }
        })
    }

    #[test]
    fn corners_sit_on_inner_junctions() {
        let (cols, rows) = (6, 4);
        let img = checker(cols, rows);
        let corners = detect_corners(&img.view(), &ResponseParams::default());

        let junctions: Vec<Point2<f32>> = (2..=rows)
            .flat_map(|j| (2..=cols).map(move |i| (i, j)))
            .map(|(i, j)| Point2::new((i * SQUARE) as f32 - 0.5, (j * SQUARE) as f32 - 0.5))
            .collect();
        let near = |p: &Point2<f32>| junctions.iter().any(|q| (p - q).norm() < 1.5);

        let hits = corners.iter().filter(|c| near(&c.position)).count();
        assert!(
            hits * 10 >= junctions.len() * 8,
            "{hits} of {} junctions found",
            junctions.len()
        );
        assert!(corners.iter().all(|c| c.strength > 0.0));
    }

    #[test]
    fn config_carries_thresholds() {
        let params = ResponseParams {
            threshold_rel: 0.35,
            nms_radius: 4,
        };
        let cfg = chess_config(&params);
        assert_eq!(cfg.params.threshold_rel, 0.35);
        assert_eq!(cfg.params.nms_radius, 4);
    }
}

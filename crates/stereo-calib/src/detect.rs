//! Grid detection seam between the pipeline and concrete detectors.

use nalgebra::Point2;
use stereo_calib_chessboard::{ChessboardDetector, ChessboardParams};
use stereo_calib_core::GrayImageView;

/// Finds the full `cols x rows` inner-corner lattice in one image.
///
/// Implementations return corners row-major (column fastest) or `None` when
/// the complete lattice is not visible.
pub trait GridDetector: Send + Sync {
    fn detect(&self, img: &GrayImageView<'_>, cols: usize, rows: usize)
        -> Option<Vec<Point2<f32>>>;
}

/// [`GridDetector`] backed by `stereo-calib-chessboard`.
#[derive(Clone, Debug, Default)]
pub struct ChessboardGridDetector {
    inner: ChessboardDetector,
}

impl ChessboardGridDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self {
            inner: ChessboardDetector::new(params),
        }
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.inner.params
    }
}

impl GridDetector for ChessboardGridDetector {
    fn detect(
        &self,
        img: &GrayImageView<'_>,
        cols: usize,
        rows: usize,
    ) -> Option<Vec<Point2<f32>>> {
        self.inner.detect(img, cols, rows).map(|d| d.corners)
    }
}

impl<D: GridDetector + ?Sized> GridDetector for &D {
    fn detect(
        &self,
        img: &GrayImageView<'_>,
        cols: usize,
        rows: usize,
    ) -> Option<Vec<Point2<f32>>> {
        (**self).detect(img, cols, rows)
    }
}

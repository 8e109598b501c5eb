use crate::gridgraph::{
    assign_grid_coordinates, connected_components, median_nearest_spacing, GridGraph,
};
use crate::params::ChessboardParams;
use crate::response::detect_corners;
use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use stereo_calib_core::{Corner, GrayImageView, GridCoords};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A complete inner-corner lattice, ordered row-major (column index fastest).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChessboardDetection {
    pub cols: usize,
    pub rows: usize,
    pub corners: Vec<Point2<f32>>,
}

/// Chessboard detector: ChESS corners, grid graph, lattice labelling.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

/// Shift lattice coordinates to start at zero and check they fill a full
/// rectangle exactly once. Returns `(width, height)`.
fn lattice_extent(coords: &[(usize, i32, i32)]) -> Option<(usize, usize)> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let max_j = coords.iter().map(|c| c.2).max()?;
    let w = (max_i - min_i + 1) as usize;
    let h = (max_j - min_j + 1) as usize;
    if w * h != coords.len() {
        return None;
    }
    let mut seen = vec![false; w * h];
    for &(_, i, j) in coords {
        let k = (j - min_j) as usize * w + (i - min_i) as usize;
        if seen[k] {
            return None;
        }
        seen[k] = true;
    }
    Some((w, h))
}

/// Order a labelled component as `cols x rows`, rotating a transposed layout
/// by 90° (a rotation keeps the board's handedness, a transpose would not).
fn order_lattice(
    corners: &[Corner],
    coords: &[(usize, i32, i32)],
    cols: usize,
    rows: usize,
) -> Option<Vec<Point2<f32>>> {
    let (w, h) = lattice_extent(coords)?;
    let min_i = coords.iter().map(|c| c.1).min()?;
    let min_j = coords.iter().map(|c| c.2).min()?;

    let labelled: Vec<(GridCoords, usize)> = if (w, h) == (cols, rows) {
        coords
            .iter()
            .map(|&(n, i, j)| (GridCoords { i: i - min_i, j: j - min_j }, n))
            .collect()
    } else if (w, h) == (rows, cols) {
        // (i, j) -> (j, w - 1 - i)
        coords
            .iter()
            .map(|&(n, i, j)| {
                let (i, j) = (i - min_i, j - min_j);
                (GridCoords { i: j, j: w as i32 - 1 - i }, n)
            })
            .collect()
    } else {
        return None;
    };

    let mut ordered = vec![Point2::origin(); cols * rows];
    for (gc, n) in labelled {
        ordered[gc.j as usize * cols + gc.i as usize] = corners[n].position;
    }
    Some(ordered)
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find a complete `cols x rows` inner-corner lattice.
    ///
    /// Returns `None` unless exactly one connected grid component has the
    /// expected size; positions are pixel-accurate (see [`crate::refine_corners`]).
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img), fields(width = img.width, height = img.height))
    )]
    pub fn detect(
        &self,
        img: &GrayImageView<'_>,
        cols: usize,
        rows: usize,
    ) -> Option<ChessboardDetection> {
        let corners = detect_corners(img, &self.params.response);
        self.detect_from_corners(&corners, cols, rows)
    }

    /// Lattice search on an existing cloud of corners.
    pub fn detect_from_corners(
        &self,
        corners: &[Corner],
        cols: usize,
        rows: usize,
    ) -> Option<ChessboardDetection> {
        let expected = cols * rows;
        if expected == 0 {
            return None;
        }

        // 1. Filter by strength.
        let strong: Vec<Corner> = corners
            .iter()
            .copied()
            .filter(|c| c.strength >= self.params.min_strength)
            .collect();

        debug!(
            "{} ChESS corners after strength filter (need {expected})",
            strong.len()
        );
        if strong.len() < expected {
            return None;
        }

        // 2. Spacing window from the median nearest-neighbour distance.
        let mut graph_params = self.params.graph;
        if self.params.adaptive_spacing {
            let spacing = median_nearest_spacing(&strong)?;
            graph_params.min_spacing_pix = self.params.spacing_window[0] * spacing;
            graph_params.max_spacing_pix = self.params.spacing_window[1] * spacing;
        }

        // 3. Grid graph and components, largest first.
        let graph = GridGraph::new(&strong, graph_params);
        let mut components = connected_components(&graph);
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));

        let candidates: Vec<_> = components.iter().filter(|c| c.len() == expected).collect();
        if candidates.len() != 1 {
            debug!(
                "no unique {cols}x{rows} component (largest has {} nodes)",
                components.first().map_or(0, |c| c.len())
            );
            return None;
        }

        // 4. Lattice coordinates and row-major ordering.
        let coords = assign_grid_coordinates(&graph, candidates[0]);
        let ordered = order_lattice(&strong, &coords, cols, rows)?;

        info!("chessboard {cols}x{rows} detected");
        Some(ChessboardDetection {
            cols,
            rows,
            corners: ordered,
        })
    }
}

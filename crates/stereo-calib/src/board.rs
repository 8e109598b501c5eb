//! Known geometry of the planar calibration grid.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Inner-corner layout of a chessboard and its physical square size.
///
/// `cols` and `rows` count inner corners, not squares.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub cols: usize,
    pub rows: usize,
    /// Edge length of one square, in the unit the extrinsics are reported in.
    pub square_size: f64,
}

impl BoardSpec {
    pub fn new(cols: usize, rows: usize, square_size: f64) -> Self {
        Self {
            cols,
            rows,
            square_size,
        }
    }

    pub fn corner_count(&self) -> usize {
        self.cols * self.rows
    }

    /// Object points `(k * s, j * s, 0)` in row-major order (column fastest),
    /// the same order the detectors return image corners in.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |k| Point3::new(k as f64 * s, j as f64 * s, 0.0)))
            .collect()
    }
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self::new(9, 6, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_points_are_row_major() {
        let board = BoardSpec::new(9, 6, 25.0);
        let pts = board.object_points();
        assert_eq!(pts.len(), board.corner_count());
        for j in 0..6 {
            for k in 0..9 {
                let p = pts[j * 9 + k];
                assert_eq!(p, Point3::new(k as f64 * 25.0, j as f64 * 25.0, 0.0));
            }
        }
    }

    #[test]
    fn empty_board_has_no_points() {
        assert!(BoardSpec::new(0, 6, 1.0).object_points().is_empty());
    }
}

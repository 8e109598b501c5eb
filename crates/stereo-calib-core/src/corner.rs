use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// An X-junction candidate produced by a corner response detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Position in image pixels.
    pub position: Point2<f32>,
    /// Direction of the bright diagonal in radians, defined modulo π.
    pub orientation: f32,
    /// Detector response; larger is stronger.
    pub strength: f32,
}

/// Integer lattice coordinates of a grid corner (`i` along columns, `j` along rows).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}

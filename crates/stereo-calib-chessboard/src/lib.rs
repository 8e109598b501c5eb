//! Chessboard inner-corner detector built on `stereo-calib-core`.
//!
//! Algorithm:
//! 1. ChESS corners and their diagonal orientation from `chess-corners`.
//! 2. Corners below `min_strength` are dropped.
//! 3. Spacing window from the median nearest-neighbour distance.
//! 4. For each corner, up to 4 neighbours (right/left/up/down) whose
//!    orientation is swapped and whose edge sits at 45° to both diagonals.
//! 5. Connected components, BFS integer coordinates `(i, j)`.
//! 6. Keep the unique component that fills the expected `cols x rows` lattice
//!    and emit it row-major.
//! 7. Optional iterative subpixel refinement ([`refine_corners`]).

mod detector;
mod geom;
mod gridgraph;
mod params;
mod response;
mod subpix;

pub use detector::{ChessboardDetection, ChessboardDetector};
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams, ResponseParams, SubPixParams};
pub use response::{chess_config, detect_corners};
pub use subpix::refine_corners;

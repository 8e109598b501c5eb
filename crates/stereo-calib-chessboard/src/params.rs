use serde::{Deserialize, Serialize};

/// ChESS corner response settings.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ResponseParams {
    /// Keep responses above `threshold_rel * max_response`.
    pub threshold_rel: f32,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: u32,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 50.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Parameters specific to the chessboard detector.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ChessboardParams {
    pub response: ResponseParams,

    /// Minimal corner strength to consider.
    pub min_strength: f32,

    /// Neighbour search settings. When `adaptive_spacing` is set, the
    /// spacing window is replaced by `spacing_window * median_spacing`.
    pub graph: GridGraphParams,

    pub adaptive_spacing: bool,

    /// `[min, max]` multiples of the median nearest-neighbour distance.
    pub spacing_window: [f32; 2],
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            response: ResponseParams::default(),
            min_strength: 0.0,
            graph: GridGraphParams::default(),
            adaptive_spacing: true,
            spacing_window: [0.5, 1.9],
        }
    }
}

/// Iterative saddle-point refinement settings.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SubPixParams {
    /// Half size of the search window; the window is `2 * half_window + 1` pixels wide.
    pub half_window: usize,
    pub max_iters: usize,
    /// Stop once a refinement step moves the point less than this (pixels).
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 11,
            max_iters: 30,
            epsilon: 0.01,
        }
    }
}

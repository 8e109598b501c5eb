use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stereo_calib_core::lm::SolverError;
use stereo_calib_core::ImageSize;

/// Problems with the image list itself. Raised before any detection runs.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("image list is empty")]
    Empty,
    #[error("image list must alternate left/right images, got an odd count ({count})")]
    OddImageCount { count: usize },
    #[error("failed to read image {}: {reason}", path.display())]
    UnreadableImage { path: PathBuf, reason: String },
}

/// Which camera of the rig an image belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraSide {
    Left,
    Right,
}

impl std::fmt::Display for CameraSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSide::Left => f.write_str("left"),
            CameraSide::Right => f.write_str("right"),
        }
    }
}

/// Why an image pair was skipped. Skips are counted, never fatal on their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    SizeMismatch {
        expected: ImageSize,
        found: ImageSize,
    },
    DetectionFailed {
        camera: CameraSide,
    },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::SizeMismatch { expected, found } => {
                write!(f, "image size {found} differs from the first image ({expected})")
            }
            RejectReason::DetectionFailed { camera } => {
                write!(f, "chessboard not found in the {camera} image")
            }
        }
    }
}

/// Numeric failures inside the intrinsic or stereo calibrators.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("need at least {required} views, got {got}")]
    NotEnoughViews { required: usize, got: usize },
    #[error("view {view} has {got} points, the object grid has {expected}")]
    PointCountMismatch {
        view: usize,
        expected: usize,
        got: usize,
    },
    #[error("left and right view counts differ ({left} vs {right})")]
    ViewCountMismatch { left: usize, right: usize },
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("calibration produced non-finite parameters")]
    NonFinite,
    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Failures while planning a rectification.
#[derive(thiserror::Error, Debug)]
pub enum RectifyError {
    #[error("baseline is zero, cameras cannot be rectified")]
    ZeroBaseline,
    #[error("need at least 8 correspondences for the fundamental matrix, got {got}")]
    NotEnoughPoints { got: usize },
    #[error("fundamental matrix estimation failed")]
    Fundamental,
    #[error("rectifying homography is singular")]
    Singular,
}

/// Reading or writing JSON records.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level pipeline error.
#[derive(thiserror::Error, Debug)]
pub enum StereoCalibError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("only {accepted} of {total} image pairs are usable, at least {required} are required")]
    InsufficientData {
        accepted: usize,
        total: usize,
        required: usize,
    },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Rectify(#[from] RectifyError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

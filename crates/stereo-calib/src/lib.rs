//! Stereo camera calibration and rectification from paired chessboard views.
//!
//! The pipeline takes an alternating list of left/right images of a planar
//! chessboard and produces:
//! - per-camera intrinsics (pinhole + radial/tangential distortion),
//! - the relative rotation and translation of the rig,
//! - rectifying rotations, projections and the disparity-to-depth matrix,
//! - dense remap tables and, optionally, rectified copies of every pair.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::path::PathBuf;
//! use stereo_calib::{BoardSpec, FsImageSource, PipelineOptions, StereoCalibrator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let paths: Vec<PathBuf> = vec!["left01.png".into(), "right01.png".into()];
//! let options = PipelineOptions::new(BoardSpec::new(9, 6, 25.0));
//! let calib = StereoCalibrator::new(options).run(&paths, &FsImageSource)?;
//! println!("stereo rms: {:.3}px", calib.extrinsics.rms);
//! calib.persist(".")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `stereo_calib::core`: images, camera model, homographies, the LM solver.
//! - `stereo_calib::chessboard`: the chessboard corner detector.
//! - [`correspondence`]: image pairs to refined corner correspondences.
//! - [`intrinsics`], [`extrinsics`]: the two calibration stages.
//! - [`quality`]: epipolar diagnostic.
//! - [`rectify`], [`remap`]: rectification planning and resampling.
//! - [`io`], [`config`]: JSON records and run configuration.

pub use stereo_calib_chessboard as chessboard;
pub use stereo_calib_core as core;

pub mod board;
pub mod config;
pub mod correspondence;
pub mod detect;
pub mod error;
pub mod extrinsics;
pub mod intrinsics;
pub mod io;
pub mod pipeline;
mod projection;
pub mod quality;
pub mod rectify;
pub mod remap;
pub mod source;

pub use board::BoardSpec;
pub use config::{load_image_list, StereoCalibConfig};
pub use correspondence::{
    CorrespondenceBuilder, CorrespondenceOptions, CorrespondenceSet, ImagePairRecord, LoadedImage,
    RejectedPair,
};
pub use detect::{ChessboardGridDetector, GridDetector};
pub use error::{
    CalibrationError, CameraSide, InputError, PersistenceError, RectifyError, RejectReason,
    StereoCalibError,
};
pub use extrinsics::{StereoCalibratorOptions, StereoExtrinsicCalibrator, StereoExtrinsics};
pub use intrinsics::{IntrinsicCalibration, IntrinsicCalibrator, IntrinsicCalibratorOptions};
pub use io::{ExtrinsicsRecord, IntrinsicsRecord};
pub use pipeline::{PipelineOptions, RectifiedPair, StereoCalibration, StereoCalibrator};
pub use projection::estimate_board_pose;
pub use quality::{EpipolarReport, QualityVerifier};
pub use rectify::{RectificationMode, RectificationPlanner, RectificationTransform, ValidRoi};
pub use remap::{build_remap_table, rectify_image, RectificationMaps, RemapTable};
pub use source::{ImageSource, MemoryImageSource};

#[cfg(feature = "image")]
pub use source::{from_luma, to_luma, FsImageSource};

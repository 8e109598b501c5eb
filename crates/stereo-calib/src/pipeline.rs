//! End-to-end driver: images in, calibrated and rectified rig out.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use stereo_calib_core::GrayImage;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::board::BoardSpec;
use crate::correspondence::{
    load_images, CorrespondenceBuilder, CorrespondenceOptions, CorrespondenceSet, LoadedImage,
};
use crate::detect::{ChessboardGridDetector, GridDetector};
use crate::error::{CameraSide, PersistenceError, StereoCalibError};
use crate::extrinsics::{StereoCalibratorOptions, StereoExtrinsicCalibrator, StereoExtrinsics};
use crate::intrinsics::{IntrinsicCalibration, IntrinsicCalibrator, IntrinsicCalibratorOptions};
use crate::io::{ExtrinsicsRecord, IntrinsicsRecord};
use crate::quality::{EpipolarReport, QualityVerifier};
use crate::rectify::{RectificationMode, RectificationPlanner, RectificationTransform};
use crate::remap::RectificationMaps;
use crate::source::ImageSource;

pub const INTRINSICS_FILE: &str = "intrinsics.json";
pub const EXTRINSICS_FILE: &str = "extrinsics.json";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub board: BoardSpec,
    pub mode: RectificationMode,
    /// Free scaling of the calibrated rectification.
    pub alpha: f64,
    /// Return rectified copies of every accepted pair.
    pub display_results: bool,
    pub correspondence: CorrespondenceOptions,
    pub intrinsics: IntrinsicCalibratorOptions,
    pub stereo: StereoCalibratorOptions,
}

impl PipelineOptions {
    pub fn new(board: BoardSpec) -> Self {
        Self {
            board,
            mode: RectificationMode::Calibrated,
            alpha: 1.0,
            display_results: true,
            correspondence: CorrespondenceOptions::default(),
            intrinsics: IntrinsicCalibratorOptions::default(),
            stereo: StereoCalibratorOptions::default(),
        }
    }
}

/// One accepted calibration pair after rectification.
#[derive(Clone, Debug)]
pub struct RectifiedPair {
    /// Index of the pair in the input list.
    pub index: usize,
    pub left_path: PathBuf,
    pub right_path: PathBuf,
    pub left: GrayImage,
    pub right: GrayImage,
}

/// Everything a run produces.
#[derive(Clone, Debug)]
pub struct StereoCalibration {
    pub correspondences: CorrespondenceSet,
    pub left: IntrinsicCalibration,
    pub right: IntrinsicCalibration,
    pub extrinsics: StereoExtrinsics,
    pub epipolar: EpipolarReport,
    pub rectification: RectificationTransform,
    pub maps: RectificationMaps,
    /// Empty unless `display_results` was set.
    pub rectified: Vec<RectifiedPair>,
}

impl StereoCalibration {
    pub fn intrinsics_record(&self) -> IntrinsicsRecord {
        IntrinsicsRecord::new(&self.left.camera, &self.right.camera)
    }

    pub fn extrinsics_record(&self) -> ExtrinsicsRecord {
        ExtrinsicsRecord::new(&self.extrinsics, &self.rectification)
    }

    /// Write `intrinsics.json` and `extrinsics.json` into `dir`.
    pub fn persist(&self, dir: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.intrinsics_record().write_json(dir.join(INTRINSICS_FILE))?;
        self.extrinsics_record().write_json(dir.join(EXTRINSICS_FILE))?;
        info!("calibration written to {}", dir.display());
        Ok(())
    }
}

/// Wires the stages together in order.
pub struct StereoCalibrator<D = ChessboardGridDetector> {
    options: PipelineOptions,
    detector: D,
}

impl StereoCalibrator<ChessboardGridDetector> {
    pub fn new(options: PipelineOptions) -> Self {
        Self::with_detector(options, ChessboardGridDetector::default())
    }
}

impl<D: GridDetector> StereoCalibrator<D> {
    pub fn with_detector(options: PipelineOptions, detector: D) -> Self {
        Self { options, detector }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Load every image from `source`, then calibrate.
    pub fn run<S: ImageSource + ?Sized>(
        &self,
        paths: &[PathBuf],
        source: &S,
    ) -> Result<StereoCalibration, StereoCalibError> {
        let images = load_images(paths, source)?;
        self.run_loaded(&images)
    }

    /// Calibrate from images already in memory (alternating left, right).
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(images = images.len(), mode = %self.options.mode))
    )]
    pub fn run_loaded(&self, images: &[LoadedImage]) -> Result<StereoCalibration, StereoCalibError> {
        let opts = &self.options;
        let correspondences = CorrespondenceBuilder::new(opts.board, &self.detector)
            .with_options(opts.correspondence)
            .build(images)?;

        let object = opts.board.object_points();
        let size = correspondences.image_size;
        let intrinsic = IntrinsicCalibrator::new(opts.intrinsics);
        let left = intrinsic.calibrate(&object, &correspondences.views(CameraSide::Left), size)?;
        let right = intrinsic.calibrate(&object, &correspondences.views(CameraSide::Right), size)?;

        let extrinsics = StereoExtrinsicCalibrator::new(opts.stereo).calibrate(
            &object,
            &correspondences.views(CameraSide::Left),
            &correspondences.views(CameraSide::Right),
            &left.camera,
            &right.camera,
        )?;
        info!("stereo RMS error: {:.4}px", extrinsics.rms);

        let epipolar = QualityVerifier::new(&left.camera, &right.camera, &extrinsics.fundamental)
            .evaluate(&correspondences.pairs);

        let planner = RectificationPlanner {
            mode: opts.mode,
            alpha: opts.alpha,
            ..RectificationPlanner::default()
        };
        let rectification =
            planner.plan(&left.camera, &right.camera, &extrinsics, &correspondences.pairs)?;
        let maps = RectificationMaps::build(&left.camera, &right.camera, &rectification)?;

        let rectified = if opts.display_results {
            correspondences
                .pairs
                .iter()
                .map(|pair| {
                    let (l, r) = maps.rectify_pair(
                        &images[2 * pair.index].image.view(),
                        &images[2 * pair.index + 1].image.view(),
                    );
                    RectifiedPair {
                        index: pair.index,
                        left_path: pair.left_path.clone(),
                        right_path: pair.right_path.clone(),
                        left: l,
                        right: r,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(StereoCalibration {
            correspondences,
            left,
            right,
            extrinsics,
            epipolar,
            rectification,
            maps,
            rectified,
        })
    }
}

//! Per-pair corner detection, subpixel refinement and pair filtering.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use stereo_calib_chessboard::{refine_corners, SubPixParams};
use stereo_calib_core::{upscale_bilinear, GrayImage, ImageSize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::board::BoardSpec;
use crate::detect::GridDetector;
use crate::error::{CameraSide, InputError, RejectReason, StereoCalibError};
use crate::source::ImageSource;

/// Smallest number of accepted pairs a calibration can run on.
pub const MIN_PAIRS: usize = 2;

/// A decoded calibration image and the path it was read from.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub image: GrayImage,
}

/// Refined corners of one accepted pair, both in board (row-major) order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePairRecord {
    /// Position of the pair in the input list.
    pub index: usize,
    pub left_path: PathBuf,
    pub right_path: PathBuf,
    pub left: Vec<Point2<f64>>,
    pub right: Vec<Point2<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedPair {
    pub index: usize,
    pub left_path: PathBuf,
    pub right_path: PathBuf,
    pub reason: RejectReason,
}

/// Everything the calibrators need from the detection stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrespondenceSet {
    pub board: BoardSpec,
    pub image_size: ImageSize,
    pub pairs: Vec<ImagePairRecord>,
    pub rejected: Vec<RejectedPair>,
    pub total_pairs: usize,
}

impl CorrespondenceSet {
    pub fn accepted(&self) -> usize {
        self.pairs.len()
    }

    pub fn views(&self, side: CameraSide) -> Vec<Vec<Point2<f64>>> {
        self.pairs
            .iter()
            .map(|p| match side {
                CameraSide::Left => p.left.clone(),
                CameraSide::Right => p.right.clone(),
            })
            .collect()
    }

    /// All left/right correspondences pooled across pairs.
    pub fn pooled(&self) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
        let left = self.pairs.iter().flat_map(|p| p.left.iter().copied()).collect();
        let right = self.pairs.iter().flat_map(|p| p.right.iter().copied()).collect();
        (left, right)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrespondenceOptions {
    /// Largest integer upscale tried when detection fails at native size.
    pub max_scale: usize,
    /// Subpixel refinement; `None` keeps the detector's positions.
    pub subpix: Option<SubPixParams>,
}

impl Default for CorrespondenceOptions {
    fn default() -> Self {
        Self {
            max_scale: 2,
            subpix: Some(SubPixParams::default()),
        }
    }
}

/// Reject empty and odd-length image lists.
pub fn validate_image_list(paths: &[PathBuf]) -> Result<(), InputError> {
    if paths.is_empty() {
        return Err(InputError::Empty);
    }
    if paths.len() % 2 != 0 {
        return Err(InputError::OddImageCount { count: paths.len() });
    }
    Ok(())
}

/// Read every image up front. Any unreadable path aborts the run.
pub fn load_images<S: ImageSource + ?Sized>(
    paths: &[PathBuf],
    source: &S,
) -> Result<Vec<LoadedImage>, InputError> {
    validate_image_list(paths)?;
    paths
        .iter()
        .map(|path| {
            let image = source.load(path)?;
            debug!("loaded {} ({})", path.display(), image.size());
            Ok(LoadedImage {
                path: path.clone(),
                image,
            })
        })
        .collect()
}

/// Turns alternating left/right images into refined corner correspondences.
pub struct CorrespondenceBuilder<D> {
    board: BoardSpec,
    detector: D,
    options: CorrespondenceOptions,
}

impl<D: GridDetector> CorrespondenceBuilder<D> {
    pub fn new(board: BoardSpec, detector: D) -> Self {
        Self {
            board,
            detector,
            options: CorrespondenceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CorrespondenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn board(&self) -> &BoardSpec {
        &self.board
    }

    /// Detect both images of every pair and keep the pairs that pass.
    ///
    /// The reference raster is the first image of the list. Fails with
    /// [`StereoCalibError::InsufficientData`] below [`MIN_PAIRS`] accepted pairs.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, images), fields(images = images.len()))
    )]
    pub fn build(&self, images: &[LoadedImage]) -> Result<CorrespondenceSet, StereoCalibError> {
        if images.is_empty() {
            return Err(InputError::Empty.into());
        }
        if images.len() % 2 != 0 {
            return Err(InputError::OddImageCount {
                count: images.len(),
            }
            .into());
        }
        let image_size = images[0].image.size();
        let total_pairs = images.len() / 2;

        #[cfg(feature = "rayon")]
        let outcomes: Vec<_> = images
            .par_chunks(2)
            .map(|pair| self.process_pair(&pair[0], &pair[1], image_size))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let outcomes: Vec<_> = images
            .chunks(2)
            .map(|pair| self.process_pair(&pair[0], &pair[1], image_size))
            .collect();

        let mut pairs = Vec::new();
        let mut rejected = Vec::new();
        for (index, (pair, outcome)) in images.chunks(2).zip(outcomes).enumerate() {
            match outcome {
                Ok((left, right)) => pairs.push(ImagePairRecord {
                    index,
                    left_path: pair[0].path.clone(),
                    right_path: pair[1].path.clone(),
                    left,
                    right,
                }),
                Err(reason) => {
                    warn!(
                        "skipping pair {index} ({}, {}): {reason}",
                        pair[0].path.display(),
                        pair[1].path.display()
                    );
                    rejected.push(RejectedPair {
                        index,
                        left_path: pair[0].path.clone(),
                        right_path: pair[1].path.clone(),
                        reason,
                    });
                }
            }
        }

        info!("{} of {} pairs accepted", pairs.len(), total_pairs);
        if pairs.len() < MIN_PAIRS {
            return Err(StereoCalibError::InsufficientData {
                accepted: pairs.len(),
                total: total_pairs,
                required: MIN_PAIRS,
            });
        }

        Ok(CorrespondenceSet {
            board: self.board,
            image_size,
            pairs,
            rejected,
            total_pairs,
        })
    }

    #[allow(clippy::type_complexity)]
    fn process_pair(
        &self,
        left: &LoadedImage,
        right: &LoadedImage,
        expected: ImageSize,
    ) -> Result<(Vec<Point2<f64>>, Vec<Point2<f64>>), RejectReason> {
        for img in [left, right] {
            let found = img.image.size();
            if found != expected {
                return Err(RejectReason::SizeMismatch { expected, found });
            }
        }
        let l = self
            .find_corners(&left.image, &left.path)
            .ok_or(RejectReason::DetectionFailed {
                camera: CameraSide::Left,
            })?;
        let r = self
            .find_corners(&right.image, &right.path)
            .ok_or(RejectReason::DetectionFailed {
                camera: CameraSide::Right,
            })?;
        Ok((l, r))
    }

    /// Detect at native resolution, then at each integer upscale, and refine
    /// the corners on the original image.
    fn find_corners(&self, img: &GrayImage, path: &Path) -> Option<Vec<Point2<f64>>> {
        let expected = self.board.corner_count();
        let mut found = None;
        for scale in 1..=self.options.max_scale.max(1) {
            let corners = if scale == 1 {
                self.detector
                    .detect(&img.view(), self.board.cols, self.board.rows)
            } else {
                let big = upscale_bilinear(&img.view(), scale);
                self.detector
                    .detect(&big.view(), self.board.cols, self.board.rows)
            };
            match corners {
                Some(c) if c.len() == expected => {
                    let inv = 1.0 / scale as f32;
                    found = Some(c.into_iter().map(|p| p * inv).collect::<Vec<_>>());
                    if scale > 1 {
                        debug!("{}: board found at scale {scale}", path.display());
                    }
                    break;
                }
                Some(c) => {
                    debug!(
                        "{}: detector returned {} corners, expected {expected}",
                        path.display(),
                        c.len()
                    );
                }
                None => {}
            }
        }

        let mut corners = found?;
        if let Some(params) = &self.options.subpix {
            refine_corners(&img.view(), &mut corners, params);
        }
        Some(
            corners
                .iter()
                .map(|p| Point2::new(p.x as f64, p.y as f64))
                .collect(),
        )
    }
}

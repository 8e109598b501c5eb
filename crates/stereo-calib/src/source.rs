//! Where calibration images come from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stereo_calib_core::GrayImage;

use crate::error::InputError;

/// Loads an 8-bit grayscale raster for a path.
pub trait ImageSource {
    fn load(&self, path: &Path) -> Result<GrayImage, InputError>;
}

/// Images held in memory, keyed by the path they stand in for.
#[derive(Clone, Debug, Default)]
pub struct MemoryImageSource {
    images: HashMap<PathBuf, GrayImage>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, image: GrayImage) {
        self.images.insert(path.into(), image);
    }

    pub fn with(mut self, path: impl Into<PathBuf>, image: GrayImage) -> Self {
        self.insert(path, image);
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageSource for MemoryImageSource {
    fn load(&self, path: &Path) -> Result<GrayImage, InputError> {
        self.images
            .get(path)
            .cloned()
            .ok_or_else(|| InputError::UnreadableImage {
                path: path.to_path_buf(),
                reason: "no such image".to_string(),
            })
    }
}

/// Decodes image files with the `image` crate and converts them to luma.
#[cfg(feature = "image")]
#[derive(Clone, Copy, Debug, Default)]
pub struct FsImageSource;

#[cfg(feature = "image")]
impl ImageSource for FsImageSource {
    fn load(&self, path: &Path) -> Result<GrayImage, InputError> {
        let img = ::image::open(path).map_err(|e| InputError::UnreadableImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(from_luma(&img.to_luma8()))
    }
}

/// Copy an `image::GrayImage` into the core raster type.
#[cfg(feature = "image")]
pub fn from_luma(img: &::image::GrayImage) -> GrayImage {
    GrayImage {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw().clone(),
    }
}

/// Convert a core raster into an `image::GrayImage` for encoding.
#[cfg(feature = "image")]
pub fn to_luma(img: &GrayImage) -> Option<::image::GrayImage> {
    ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
}

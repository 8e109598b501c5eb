//! JSON run configuration and image lists.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stereo_calib_chessboard::ChessboardParams;

use crate::board::BoardSpec;
use crate::correspondence::CorrespondenceOptions;
use crate::error::PersistenceError;
use crate::extrinsics::StereoCalibratorOptions;
use crate::intrinsics::IntrinsicCalibratorOptions;
use crate::pipeline::PipelineOptions;
use crate::rectify::RectificationMode;

fn default_alpha() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Everything needed for one calibration run.
///
/// Images come either inline (`images`) or from a separate list file
/// (`image_list`); relative paths are resolved against the directory of the
/// file that names them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibConfig {
    #[serde(default)]
    pub images: Vec<PathBuf>,
    #[serde(default)]
    pub image_list: Option<PathBuf>,
    #[serde(default)]
    pub board: BoardSpec,
    #[serde(default)]
    pub mode: RectificationMode,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Produce rectified copies of the calibration pairs.
    #[serde(default = "default_true")]
    pub display_results: bool,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub correspondence: CorrespondenceOptions,
    #[serde(default)]
    pub intrinsics: IntrinsicCalibratorOptions,
    #[serde(default)]
    pub stereo: StereoCalibratorOptions,
    #[serde(default)]
    pub chessboard: ChessboardParams,
}

impl Default for StereoCalibConfig {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            image_list: None,
            board: BoardSpec::default(),
            mode: RectificationMode::default(),
            alpha: default_alpha(),
            display_results: true,
            output_dir: None,
            correspondence: CorrespondenceOptions::default(),
            intrinsics: IntrinsicCalibratorOptions::default(),
            stereo: StereoCalibratorOptions::default(),
            chessboard: ChessboardParams::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageListFile {
    Plain(Vec<PathBuf>),
    Wrapped { images: Vec<PathBuf> },
}

fn resolve(base: Option<&Path>, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    match base {
        Some(dir) => paths
            .into_iter()
            .map(|p| if p.is_relative() { dir.join(p) } else { p })
            .collect(),
        None => paths,
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// Read an image list: either `["a.png", ...]` or `{"images": [...]}`.
pub fn load_image_list(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, PersistenceError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)?;
    let paths = match serde_json::from_str::<ImageListFile>(&raw)? {
        ImageListFile::Plain(p) => p,
        ImageListFile::Wrapped { images } => images,
    };
    Ok(resolve(parent_dir(path), paths))
}

impl StereoCalibConfig {
    /// Load a JSON config; relative paths inside it become relative to its directory.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let mut cfg: Self = serde_json::from_str(&raw)?;
        let base = parent_dir(path);
        cfg.images = resolve(base, std::mem::take(&mut cfg.images));
        if let (Some(dir), Some(list)) = (base, cfg.image_list.as_mut()) {
            if list.is_relative() {
                *list = dir.join(&*list);
            }
        }
        Ok(cfg)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The ordered image paths: inline images first, otherwise the list file.
    pub fn image_paths(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        if !self.images.is_empty() {
            return Ok(self.images.clone());
        }
        match &self.image_list {
            Some(list) => load_image_list(list),
            None => Ok(Vec::new()),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            board: self.board,
            mode: self.mode,
            alpha: self.alpha,
            display_results: self.display_results,
            correspondence: self.correspondence,
            intrinsics: self.intrinsics,
            stereo: self.stereo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: StereoCalibConfig =
            serde_json::from_str(r#"{"board": {"cols": 9, "rows": 6, "square_size": 25.0}}"#)
                .expect("parse");
        assert_eq!(cfg.board, BoardSpec::new(9, 6, 25.0));
        assert_eq!(cfg.mode, RectificationMode::Calibrated);
        assert_eq!(cfg.alpha, 1.0);
        assert!(cfg.display_results);
        assert_eq!(cfg.correspondence.max_scale, 2);
        assert_eq!(cfg.stereo.lm.max_iters, 100);
        assert_eq!(cfg.intrinsics.lm.max_iters, 30);
    }

    #[test]
    fn mode_is_lowercase_in_json() {
        let cfg: StereoCalibConfig =
            serde_json::from_str(r#"{"mode": "hartley", "display_results": false}"#).expect("parse");
        assert_eq!(cfg.mode, RectificationMode::Hartley);
        assert!(!cfg.display_results);
    }

    #[test]
    fn config_paths_resolve_against_its_directory() {
        let dir = tempdir().expect("tempdir");
        let cfg_path = dir.path().join("stereo.json");
        fs::write(&cfg_path, r#"{"images": ["left01.png", "/abs/right01.png"]}"#).expect("write");
        let cfg = StereoCalibConfig::load_json(&cfg_path).expect("load");
        assert_eq!(cfg.images[0], dir.path().join("left01.png"));
        assert_eq!(cfg.images[1], PathBuf::from("/abs/right01.png"));
    }

    #[test]
    fn image_list_accepts_both_shapes() {
        let dir = tempdir().expect("tempdir");
        let plain = dir.path().join("plain.json");
        fs::write(&plain, r#"["l.png", "r.png"]"#).expect("write");
        let wrapped = dir.path().join("wrapped.json");
        fs::write(&wrapped, r#"{"images": ["l.png", "r.png"]}"#).expect("write");

        let a = load_image_list(&plain).expect("plain");
        let b = load_image_list(&wrapped).expect("wrapped");
        assert_eq!(a, b);
        assert_eq!(a[1], dir.path().join("r.png"));
    }

    #[test]
    fn image_list_file_is_used_when_no_inline_images() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("list.json"), r#"["a.png", "b.png"]"#).expect("write");
        let cfg_path = dir.path().join("cfg.json");
        fs::write(&cfg_path, r#"{"image_list": "list.json"}"#).expect("write");
        let cfg = StereoCalibConfig::load_json(&cfg_path).expect("load");
        let paths = cfg.image_paths().expect("paths");
        assert_eq!(paths, vec![dir.path().join("a.png"), dir.path().join("b.png")]);
    }

    #[test]
    fn config_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        let cfg = StereoCalibConfig {
            board: BoardSpec::new(7, 5, 30.0),
            mode: RectificationMode::Hartley,
            alpha: 0.0,
            ..Default::default()
        };
        cfg.write_json(&path).expect("write");
        let back = StereoCalibConfig::load_json(&path).expect("load");
        assert_eq!(back, cfg);
    }
}

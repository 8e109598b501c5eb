use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use log::{error, info};
use stereo_calib::{
    load_image_list, to_luma, BoardSpec, ChessboardGridDetector, FsImageSource, PersistenceError,
    RectificationMode, StereoCalibConfig, StereoCalibration, StereoCalibrator,
};

const DEFAULT_INPUT: &str = "stereo_calib.json";

/// Calibrate a stereo rig from alternating left/right chessboard images.
///
/// `-h` is the board height; use `--help` for this text.
#[derive(Debug, Parser)]
#[command(author, version, about, disable_help_flag = true)]
struct Args {
    /// JSON run config, or a JSON image list (`["l1.png", "r1.png", ...]`).
    #[arg(value_name = "CONFIG_OR_LIST", default_value = DEFAULT_INPUT)]
    input: PathBuf,

    /// Inner corners per board row.
    #[arg(short = 'w', long = "width")]
    width: Option<usize>,

    /// Inner corners per board column.
    #[arg(short = 'h', long = "height")]
    height: Option<usize>,

    /// Square size in world units.
    #[arg(short = 's', long = "square")]
    square_size: Option<f64>,

    /// Rectification mode: `calibrated` or `hartley`.
    #[arg(long)]
    mode: Option<RectificationMode>,

    /// Free scaling for calibrated rectification, 0..=1.
    #[arg(long)]
    alpha: Option<f64>,

    /// Skip writing rectified copies of the calibration pairs.
    #[arg(long)]
    no_rectify: bool,

    /// Directory for `intrinsics.json`, `extrinsics.json` and rectified images.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long)]
    json_log: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args).and_then(|()| try_main(&args)) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[cfg(feature = "tracing")]
fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    tracing_log::LogTracer::init()?;
    stereo_calib::core::init_tracing(args.json_log);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    // Calibration progress is useful by default, so start at info.
    let level = stereo_calib::core::level_from_verbosity(args.verbose.saturating_add(1));
    stereo_calib::core::init_with_level(level)?;
    if args.json_log {
        log::warn!("--json-log needs the `tracing` feature; using plain logs");
    }
    Ok(())
}

/// Read `input` as a run config, falling back to a bare image list, then
/// apply command-line overrides.
fn resolve_config(args: &Args) -> Result<StereoCalibConfig, PersistenceError> {
    let mut cfg = match StereoCalibConfig::load_json(&args.input) {
        Ok(cfg) => cfg,
        Err(PersistenceError::Json(_)) => StereoCalibConfig {
            images: load_image_list(&args.input)?,
            ..StereoCalibConfig::default()
        },
        Err(e) => return Err(e),
    };

    let board = cfg.board;
    cfg.board = BoardSpec::new(
        args.width.unwrap_or(board.cols),
        args.height.unwrap_or(board.rows),
        args.square_size.unwrap_or(board.square_size),
    );
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }
    if let Some(alpha) = args.alpha {
        cfg.alpha = alpha;
    }
    if args.no_rectify {
        cfg.display_results = false;
    }
    if let Some(dir) = &args.out_dir {
        cfg.output_dir = Some(dir.clone());
    }
    Ok(cfg)
}

fn write_rectified(calib: &StereoCalibration, dir: &Path) -> Result<usize, Box<dyn Error>> {
    if calib.rectified.is_empty() {
        return Ok(0);
    }
    let dir = dir.join("rectified");
    fs::create_dir_all(&dir)?;
    for pair in &calib.rectified {
        for (side, img) in [("left", &pair.left), ("right", &pair.right)] {
            let luma = to_luma(img).ok_or("rectified buffer does not match its size")?;
            luma.save(dir.join(format!("pair{:02}_{side}.png", pair.index)))?;
        }
    }
    Ok(calib.rectified.len())
}

fn try_main(args: &Args) -> Result<(), Box<dyn Error>> {
    let cfg = resolve_config(args)?;
    let paths = cfg.image_paths()?;
    info!(
        "{} images, board {}x{} squares of {}",
        paths.len(),
        cfg.board.cols,
        cfg.board.rows,
        cfg.board.square_size
    );

    let detector = ChessboardGridDetector::new(cfg.chessboard);
    let calib = StereoCalibrator::with_detector(cfg.pipeline_options(), detector)
        .run(&paths, &FsImageSource)?;

    println!(
        "accepted pairs: {} of {}",
        calib.correspondences.accepted(),
        calib.correspondences.total_pairs
    );
    println!(
        "reprojection rms: left {:.4}px, right {:.4}px, stereo {:.4}px",
        calib.left.camera.rms, calib.right.camera.rms, calib.extrinsics.rms
    );
    println!("average epipolar error: {:.4}px", calib.epipolar.mean_error);

    let out = cfg.output_dir();
    // Results stay usable even if the records cannot be written.
    let persisted = calib.persist(&out);
    if let Err(e) = &persisted {
        error!("failed to write calibration to {}: {e}", out.display());
    }
    let written = write_rectified(&calib, &out)?;
    if written > 0 {
        info!("wrote {written} rectified pairs to {}", out.join("rectified").display());
    }
    persisted?;
    Ok(())
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::Point2;
use stereo_calib::core::synthetic::{project_points, CheckerboardPattern, StereoRig};
use stereo_calib::core::{GrayImage, GrayImageView};
use stereo_calib::{
    BoardSpec, CameraSide, CorrespondenceOptions, ExtrinsicsRecord, GridDetector, InputError,
    IntrinsicsRecord, MemoryImageSource, PipelineOptions, RectificationMode, RejectReason,
    StereoCalibError, StereoCalibrator,
};
use tempfile::tempdir;

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves precomputed corners for images tagged in their first pixel.
/// Tags without an entry fail detection.
struct TaggedDetector {
    corners: HashMap<u8, Vec<Point2<f32>>>,
    calls: AtomicUsize,
}

impl GridDetector for TaggedDetector {
    fn detect(&self, img: &GrayImageView<'_>, _cols: usize, _rows: usize) -> Option<Vec<Point2<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if img.width != WIDTH {
            return None;
        }
        self.corners.get(&img.data[0]).cloned()
    }
}

fn tagged_image(tag: u8) -> GrayImage {
    let mut img = GrayImage::new(WIDTH, HEIGHT);
    img.data[0] = tag;
    img
}

fn tag(pair: usize, side: CameraSide) -> u8 {
    (2 * pair + usize::from(side == CameraSide::Right) + 1) as u8
}

/// `pairs` synthetic pairs of a 9x6 board; `fail` lists (pair, side) whose
/// detection should fail.
fn scenario(pairs: usize, fail: &[(usize, CameraSide)]) -> (Vec<PathBuf>, MemoryImageSource, TaggedDetector) {
    let rig = StereoRig::example();
    let pattern = CheckerboardPattern::new(9, 6, 25.0);
    let object = pattern.inner_corners();
    let right_from_left = rig.right_from_left();

    let mut paths = Vec::new();
    let mut source = MemoryImageSource::new();
    let mut corners = HashMap::new();
    for (i, pose) in rig.board_poses(&pattern, 600.0, pairs).iter().enumerate() {
        for side in [CameraSide::Left, CameraSide::Right] {
            let t = tag(i, side);
            let path = PathBuf::from(format!("{side}{:02}.png", i + 1).to_lowercase());
            source.insert(path.clone(), tagged_image(t));
            paths.push(path);
            if fail.contains(&(i, side)) {
                continue;
            }
            let (cam, pose) = match side {
                CameraSide::Left => (&rig.left, *pose),
                CameraSide::Right => (&rig.right, right_from_left * pose),
            };
            let px = project_points(cam, &pose, &object).expect("board in front of camera");
            corners.insert(t, px.iter().map(|p| Point2::new(p.x as f32, p.y as f32)).collect());
        }
    }
    let detector = TaggedDetector {
        corners,
        calls: AtomicUsize::new(0),
    };
    (paths, source, detector)
}

fn options() -> PipelineOptions {
    PipelineOptions {
        correspondence: CorrespondenceOptions {
            max_scale: 2,
            subpix: None,
        },
        ..PipelineOptions::new(BoardSpec::new(9, 6, 25.0))
    }
}

#[test]
fn failed_pair_is_skipped_and_calibration_proceeds() {
    init_logger();
    let (paths, source, detector) = scenario(4, &[(3, CameraSide::Right)]);
    let calib = StereoCalibrator::with_detector(options(), &detector)
        .run(&paths, &source)
        .expect("three usable pairs");

    let set = &calib.correspondences;
    assert_eq!(set.total_pairs, 4);
    assert_eq!(set.accepted(), 3);
    assert_eq!(set.rejected.len(), 1);
    assert_eq!(set.rejected[0].index, 3);
    assert_eq!(
        set.rejected[0].reason,
        RejectReason::DetectionFailed {
            camera: CameraSide::Right
        }
    );
    for pair in &set.pairs {
        assert_eq!(pair.left.len(), 54);
        assert_eq!(pair.right.len(), 54);
    }

    assert_eq!(calib.left.poses.len(), 3);
    assert_eq!(calib.right.poses.len(), 3);
    assert!(calib.left.camera.rms < 0.5, "left rms {}", calib.left.camera.rms);
    assert!(calib.right.camera.rms < 0.5, "right rms {}", calib.right.camera.rms);
    assert!(calib.extrinsics.rms.is_finite());
    assert!(
        (calib.extrinsics.baseline() - 60.0).abs() < 3.0,
        "baseline {}",
        calib.extrinsics.baseline()
    );
    assert!(calib.epipolar.mean_error < 0.5, "epipolar {}", calib.epipolar.mean_error);
    assert_eq!(calib.epipolar.points, 3 * 54);

    assert_eq!(calib.rectified.len(), 3);
    assert_eq!(calib.rectified[0].left.size(), calib.correspondences.image_size);
    assert_eq!(calib.maps.left.size(), calib.correspondences.image_size);
}

#[test]
fn odd_list_fails_before_detection() {
    let (mut paths, source, detector) = scenario(2, &[]);
    paths.pop();
    let err = StereoCalibrator::with_detector(options(), &detector)
        .run(&paths, &source)
        .unwrap_err();
    assert!(matches!(
        err,
        StereoCalibError::Input(InputError::OddImageCount { count: 3 })
    ));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn unreadable_image_is_fatal() {
    let (mut paths, source, detector) = scenario(2, &[]);
    paths[1] = PathBuf::from("missing.png");
    let err = StereoCalibrator::with_detector(options(), &detector)
        .run(&paths, &source)
        .unwrap_err();
    assert!(matches!(
        err,
        StereoCalibError::Input(InputError::UnreadableImage { .. })
    ));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn one_usable_pair_is_insufficient() {
    let (paths, source, detector) = scenario(3, &[(0, CameraSide::Left), (2, CameraSide::Right)]);
    let err = StereoCalibrator::with_detector(options(), &detector)
        .run(&paths, &source)
        .unwrap_err();
    match err {
        StereoCalibError::InsufficientData {
            accepted,
            total,
            required,
        } => {
            assert_eq!((accepted, total, required), (1, 3, 2));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hartley_mode_row_aligns_pairs() {
    init_logger();
    let (paths, source, detector) = scenario(4, &[]);
    let opts = PipelineOptions {
        mode: RectificationMode::Hartley,
        display_results: false,
        ..options()
    };
    let calib = StereoCalibrator::with_detector(opts, &detector)
        .run(&paths, &source)
        .expect("calibration");

    assert_eq!(calib.rectification.mode, RectificationMode::Hartley);
    assert!(calib.rectified.is_empty());
    for j in 0..4 {
        assert_eq!(calib.rectification.q[(3, j)], 0.0);
    }

    let plan = &calib.rectification;
    let mut worst: f64 = 0.0;
    for pair in &calib.correspondences.pairs {
        for (l, r) in pair.left.iter().zip(&pair.right) {
            let yl = plan.rectify_point(CameraSide::Left, &calib.left.camera, *l).y;
            let yr = plan.rectify_point(CameraSide::Right, &calib.right.camera, *r).y;
            worst = worst.max((yl - yr).abs());
        }
    }
    assert!(worst < 0.5, "row error {worst}");
}

#[test]
fn results_persist_to_json() {
    let (paths, source, detector) = scenario(3, &[]);
    let opts = PipelineOptions {
        display_results: false,
        ..options()
    };
    let calib = StereoCalibrator::with_detector(opts, &detector)
        .run(&paths, &source)
        .expect("calibration");

    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("nested").join("out");
    calib.persist(&out).expect("persist");

    let intr = IntrinsicsRecord::load_json(out.join("intrinsics.json")).expect("intrinsics");
    assert_eq!(intr, calib.intrinsics_record());
    let (left, _) = intr.cameras();
    assert_eq!(left.matrix(), calib.left.camera.matrix());

    let extr = ExtrinsicsRecord::load_json(out.join("extrinsics.json")).expect("extrinsics");
    assert_eq!(extr.rotation(), calib.extrinsics.rotation);
    assert_eq!(extr.disparity_to_depth(), calib.rectification.q);
}

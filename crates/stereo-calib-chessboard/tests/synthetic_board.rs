use stereo_calib_chessboard::{refine_corners, ChessboardDetector, SubPixParams};
use stereo_calib_core::synthetic::{project_points, render_checkerboard, CheckerboardPattern, StereoRig};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn max_error(detected: &[nalgebra::Point2<f32>], truth: &[nalgebra::Point2<f64>]) -> f64 {
    detected
        .iter()
        .zip(truth)
        .map(|(d, t)| ((d.x as f64 - t.x).powi(2) + (d.y as f64 - t.y).powi(2)).sqrt())
        .fold(0.0, f64::max)
}

#[test]
fn detects_and_refines_rendered_views() {
    init_logger();
    let rig = StereoRig::example();
    let pattern = CheckerboardPattern::new(9, 6, 25.0);
    let object = pattern.inner_corners();
    let detector = ChessboardDetector::default();

    for pose in rig.board_poses(&pattern, 600.0, 4) {
        let img = render_checkerboard(&rig.left, &pose, &pattern, 3);
        let truth = project_points(&rig.left, &pose, &object).expect("projectable");

        let mut det = detector
            .detect(&img.view(), 9, 6)
            .expect("board should be found");
        assert_eq!(det.corners.len(), 54);
        assert!(max_error(&det.corners, &truth) < 1.5, "coarse order/position");

        refine_corners(&img.view(), &mut det.corners, &SubPixParams::default());
        let err = max_error(&det.corners, &truth);
        assert!(err < 0.15, "refined error {err}");
    }
}

#[test]
fn wrong_dimensions_are_not_reported() {
    init_logger();
    let rig = StereoRig::example();
    let pattern = CheckerboardPattern::new(9, 6, 25.0);
    let pose = rig.board_poses(&pattern, 600.0, 1)[0];
    let img = render_checkerboard(&rig.left, &pose, &pattern, 2);

    let detector = ChessboardDetector::default();
    assert!(detector.detect(&img.view(), 8, 6).is_none());
    assert!(detector.detect(&img.view(), 9, 6).is_some());
}

#[test]
fn blank_image_has_no_board() {
    let img = stereo_calib_core::GrayImage::from_fn(320, 240, |_, _| 128);
    assert!(ChessboardDetector::default().detect(&img.view(), 9, 6).is_none());
}

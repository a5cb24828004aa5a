use camera_calib_core::{
    BoardSize, CalibrationSettings, GrayImage, ObservationCollector, PatternDetector, SettingsFile,
};
use camera_calib_detect::{CornerRefiner, DetectorConfigError, GridDetector};
use std::path::Path;

fn settings(pattern: &str, circle_settings: Option<&Path>) -> CalibrationSettings {
    CalibrationSettings::validate(&SettingsFile {
        calibration_grid_pattern: pattern.into(),
        calibration_board_size: [4, 6],
        distance_between_points: 0.025,
        image_source_type: "directory".into(),
        image_source_path: "frames".into(),
        camera_parameters_file_path: "camera.txt".into(),
        circle_detector_settings_path: circle_settings.map(|p| p.to_string_lossy().into_owned()),
        required_images_count: Some(2),
    })
    .expect("valid settings")
}

/// 7x5 squares of 24 px starting at (40, 40): 4x6 inner corners.
fn chessboard_frame() -> GrayImage {
    let (w, h) = (248, 200);
    let mut data = vec![230u8; w * h];
    for y in 40..160 {
        for x in 40..208 {
            if ((x - 40) / 24 + (y - 40) / 24) % 2 == 0 {
                data[y * w + x] = 25;
            }
        }
    }
    GrayImage::new(w, h, data).expect("buffer")
}

#[test]
fn chessboard_settings_select_chessboard_detector() {
    let s = settings("chessboard", None);
    let det = GridDetector::for_settings(&s).expect("detector");
    assert!(matches!(det, GridDetector::Chessboard(_)));
}

#[test]
fn circle_settings_are_read_from_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("circles.json");
    std::fs::write(
        &path,
        r#"{
            "maxArea": 4000, "minArea": 40, "minThreshold": 30, "maxThreshold": 200,
            "thresholdStep": 5, "filterByCircularity": true, "minCircularity": 0.6,
            "filterByInertia": true, "filterByConvexity": false
        }"#,
    )
    .expect("write");

    let s = settings("asymmetric_circle_grid", Some(&path));
    match GridDetector::for_settings(&s).expect("detector") {
        GridDetector::Circles(d) => {
            assert_eq!(d.params.min_area, 40.0);
            assert_eq!(d.params.threshold_step, 5.0);
            assert!(!d.params.filter_by_convexity);
            assert_eq!(d.layout, camera_calib_detect::CircleLayout::Asymmetric);
        }
        other => panic!("expected circle detector, got {other:?}"),
    }
}

#[test]
fn missing_circle_settings_file_is_an_error() {
    let s = settings("symmetric_circle_grid", Some(Path::new("/no/such/circles.json")));
    let err = GridDetector::for_settings(&s).unwrap_err();
    assert!(matches!(err, DetectorConfigError::Io { .. }));
}

#[test]
fn refined_chessboard_observations_reach_the_collector() {
    let s = settings("chessboard", None);
    let det = GridDetector::for_settings(&s).expect("detector");
    assert!(det
        .detect(&chessboard_frame().view(), BoardSize { rows: 4, cols: 6 })
        .is_some());

    let mut collector = ObservationCollector::new(&s, det, CornerRefiner::default());
    for _ in 0..2 {
        assert_eq!(collector.evaluate_frame(chessboard_frame()), Ok(true));
        collector.accept().expect("accept");
    }
    collector.finalize().expect("finalize");
    let set = collector.finish().expect("finish");
    assert_eq!(set.len(), 2);
    let first = &set.observations[0].image_points()[0];
    assert!((first.x - 63.5).abs() < 0.5 && (first.y - 63.5).abs() < 0.5, "{first:?}");
}

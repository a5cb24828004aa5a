use camera_calib::core::{
    BoardSize, CalibrationSolver, FrameError, FrameSource, GrayImage, GrayImageView, Key,
    KeyInput, NoRefinement, PatternDetector, SolverError, SolverInput, SolverOutput,
};
use camera_calib::{store, CalibrationSettings, Pipeline, RunError, RunOutcome, SettingsFile};
use nalgebra::{Matrix3, Point2, Vector3};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

/// Finds a fixed layout in every frame brighter than black.
struct FixedLayoutDetector;

impl PatternDetector for FixedLayoutDetector {
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        if image.data[0] == 0 {
            return None;
        }
        let mut pts = Vec::with_capacity(board.point_count());
        for i in 0..board.rows {
            for j in 0..board.cols {
                pts.push(Point2::new(4.0 + 3.0 * j as f64, 4.0 + 3.0 * i as f64));
            }
        }
        Some(pts)
    }
}

struct IdentityLikeSolver;

impl CalibrationSolver for IdentityLikeSolver {
    fn solve(&self, input: &SolverInput) -> Result<SolverOutput, SolverError> {
        let n = input.image_points.len();
        Ok(SolverOutput {
            camera_matrix: Matrix3::identity(),
            distortion: input.initial_distortion.clone(),
            rotation_vectors: vec![Vector3::zeros(); n],
            translation_vectors: vec![Vector3::new(0.0, 0.0, 1.0); n],
            rms_error: None,
        })
    }
}

fn pipeline() -> Pipeline<FixedLayoutDetector, NoRefinement, IdentityLikeSolver> {
    Pipeline::new(FixedLayoutDetector, NoRefinement, IdentityLikeSolver)
}

fn settings(source_kind: &str, source: &str, output: &Path, required: i64) -> CalibrationSettings {
    CalibrationSettings::validate(&SettingsFile {
        calibration_grid_pattern: "chessboard".into(),
        calibration_board_size: [6, 4],
        distance_between_points: 0.0265,
        image_source_type: source_kind.into(),
        image_source_path: source.into(),
        camera_parameters_file_path: output.to_string_lossy().into_owned(),
        circle_detector_settings_path: None,
        required_images_count: Some(required),
    })
    .expect("valid settings")
}

fn write_images(dir: &Path, count: usize, value: u8) {
    for i in 0..count {
        image::GrayImage::from_pixel(40, 30, image::Luma([value]))
            .save(dir.join(format!("img_{i:02}.png")))
            .expect("write png");
    }
}

#[test]
fn directory_of_twenty_images_is_calibrated_and_saved() {
    let images = tempfile::tempdir().expect("tempdir");
    write_images(images.path(), 20, 128);
    let out_dir = tempfile::tempdir().expect("tempdir");
    let output = out_dir.path().join("camera.txt");
    let s = settings("directory", &images.path().to_string_lossy(), &output, 15);

    let mut console = Vec::new();
    let params = pipeline().run_directory(&s, &mut console).expect("calibrated");

    assert_eq!(params.rotation_vectors().len(), 20);
    let text = std::fs::read_to_string(&output).expect("parameter file");
    let tokens: Vec<&str> = text.split_whitespace().collect();
    assert_eq!(&tokens[..2], &["3", "3"]);
    assert_eq!(store::load(&output).expect("reload").camera_matrix(), &Matrix3::identity());

    let console = String::from_utf8(console).expect("utf8");
    assert!(console.contains(" - Camera calibration has started."));
    assert!(console.contains(&format!(" - Calibration parameters saved to: {}", output.display())));
}

#[test]
fn too_few_images_fail_before_solving() {
    let images = tempfile::tempdir().expect("tempdir");
    write_images(images.path(), 10, 128);
    let out_dir = tempfile::tempdir().expect("tempdir");
    let output = out_dir.path().join("camera.txt");
    let s = settings("directory", &images.path().to_string_lossy(), &output, 15);

    let err = pipeline().run_directory(&s, &mut std::io::sink()).unwrap_err();
    assert!(matches!(
        err,
        RunError::InsufficientImages {
            found: 10,
            required: 15
        }
    ));
    assert!(!output.exists());
}

#[test]
fn images_without_pattern_do_not_count() {
    let images = tempfile::tempdir().expect("tempdir");
    write_images(images.path(), 12, 0);
    let out_dir = tempfile::tempdir().expect("tempdir");
    let output = out_dir.path().join("camera.txt");
    let s = settings("directory", &images.path().to_string_lossy(), &output, 5);

    let err = pipeline().run_directory(&s, &mut std::io::sink()).unwrap_err();
    assert!(matches!(
        err,
        RunError::InsufficientImages {
            found: 0,
            required: 5
        }
    ));
    assert!(!output.exists());
}

struct Frames(VecDeque<GrayImage>);

impl FrameSource for Frames {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError> {
        Ok(self.0.pop_front())
    }
}

struct ScriptedKeys(VecDeque<Option<Key>>);

impl KeyInput for ScriptedKeys {
    fn wait_key(&mut self, _timeout: Duration) -> std::io::Result<Option<Key>> {
        Ok(self.0.pop_front().flatten())
    }
}

#[test]
fn interactive_capture_reports_progress_and_calibrates() {
    let out_dir = tempfile::tempdir().expect("tempdir");
    let output = out_dir.path().join("camera.txt");
    let s = settings("stream", "unused_%d.png", &output, 2);

    let mut frames = Frames([128, 0, 128, 128, 128].map(|v| GrayImage::filled(40, 30, v)).into());
    let mut keys = ScriptedKeys(
        [
            Some(Key::Space),
            Some(Key::Space),
            Some(Key::Enter),
            Some(Key::Space),
            Some(Key::Enter),
        ]
        .into(),
    );
    let mut console = Vec::new();
    let outcome = pipeline()
        .run_frames(&s, &mut frames, &mut keys, &mut console)
        .expect("session");

    assert!(matches!(outcome, RunOutcome::Calibrated(_)));
    assert!(output.exists());
    let console = String::from_utf8(console).expect("utf8");
    assert!(console
        .contains(" - Calibration image has been accepted [calibration image number: 1].\r\n"));
    assert!(console.contains(" - Unable to accept image - pattern was not found.\r\n"));
    assert!(console
        .contains(" - Insufficient number of calibration images. Required number: 2.\r\n"));
    assert!(console
        .contains(" - Calibration image has been accepted [calibration image number: 2].\r\n"));
}

#[test]
fn escape_ends_capture_without_a_parameter_file() {
    let out_dir = tempfile::tempdir().expect("tempdir");
    let output = out_dir.path().join("camera.txt");
    let s = settings("stream", "unused_%d.png", &output, 1);

    let mut frames = Frames([128, 128].map(|v| GrayImage::filled(40, 30, v)).into());
    let mut keys = ScriptedKeys([Some(Key::Space), Some(Key::Escape)].into());
    let outcome = pipeline()
        .run_frames(&s, &mut frames, &mut keys, &mut std::io::sink())
        .expect("session");

    assert_eq!(outcome, RunOutcome::Aborted);
    assert!(!output.exists());
}

#[test]
fn device_index_stream_is_an_unopenable_source() {
    let out_dir = tempfile::tempdir().expect("tempdir");
    let s = settings("stream", "0", &out_dir.path().join("camera.txt"), 1);
    let mut keys = ScriptedKeys(VecDeque::new());
    let err = pipeline()
        .run_stream(&s, &mut keys, &mut std::io::sink())
        .unwrap_err();
    assert!(matches!(err, RunError::Source(_)));
}

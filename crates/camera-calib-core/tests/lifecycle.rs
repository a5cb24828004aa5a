use camera_calib_core::{
    run_batch, store, BoardSize, CalibrationEngine, CalibrationSettings, CalibrationSolver,
    FrameError, FrameSource, GrayImage, GrayImageView, NoRefinement, ObservationCollector,
    PatternDetector, SessionError, SettingsFile, SolverError, SolverInput, SolverOutput,
};
use nalgebra::{Matrix3, Point2, Vector3};
use std::cell::Cell;

struct FixedLayoutDetector;

impl PatternDetector for FixedLayoutDetector {
    fn detect(&self, _: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        let mut pts = Vec::with_capacity(board.point_count());
        for i in 0..board.rows {
            for j in 0..board.cols {
                pts.push(Point2::new(10.0 + 5.0 * j as f64, 10.0 + 5.0 * i as f64));
            }
        }
        Some(pts)
    }
}

#[derive(Default)]
struct IdentityLikeSolver {
    calls: Cell<usize>,
}

impl CalibrationSolver for IdentityLikeSolver {
    fn solve(&self, input: &SolverInput) -> Result<SolverOutput, SolverError> {
        self.calls.set(self.calls.get() + 1);
        let n = input.image_points.len();
        let w = input.image_size.width as f64;
        let h = input.image_size.height as f64;
        Ok(SolverOutput {
            camera_matrix: Matrix3::new(w, 0.0, w / 2.0, 0.0, w, h / 2.0, 0.0, 0.0, 1.0),
            distortion: input.initial_distortion.clone(),
            rotation_vectors: vec![Vector3::zeros(); n],
            translation_vectors: vec![Vector3::new(0.0, 0.0, 1.0); n],
            rms_error: Some(0.0),
        })
    }
}

struct Frames {
    remaining: usize,
}

impl FrameSource for Frames {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(GrayImage::filled(64, 48, 128)))
    }
}

fn settings(output: &std::path::Path) -> CalibrationSettings {
    CalibrationSettings::validate(&SettingsFile {
        calibration_grid_pattern: "chessboard".into(),
        calibration_board_size: [6, 4],
        distance_between_points: 0.0265,
        image_source_type: "directory".into(),
        image_source_path: "unused".into(),
        camera_parameters_file_path: output.to_string_lossy().into_owned(),
        circle_detector_settings_path: None,
        required_images_count: None,
    })
    .expect("valid settings")
}

#[test]
fn twenty_frames_solve_and_persist_a_3x3_matrix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("camera.txt");
    let settings = settings(&out);

    let mut collector = ObservationCollector::new(&settings, FixedLayoutDetector, NoRefinement);
    run_batch(&mut collector, &mut Frames { remaining: 20 }, |_| {}).expect("batch");
    let set = collector.finish().expect("finalized");
    assert_eq!(set.len(), 20);

    let solver = IdentityLikeSolver::default();
    let params = CalibrationEngine::new(&solver).solve_set(set).expect("solve");
    assert_eq!(params.rotation_vectors().len(), 20);
    store::save(&params, settings.output_parameters_path()).expect("save");

    let text = std::fs::read_to_string(&out).expect("read");
    let tokens: Vec<&str> = text.split_whitespace().collect();
    assert_eq!(tokens[0], "3");
    assert_eq!(tokens[1], "3");

    let back = store::load(&out).expect("load");
    assert_eq!(back.camera_matrix(), params.camera_matrix());
    assert_eq!(back.distortion(), params.distortion());
}

#[test]
fn too_few_frames_never_reach_the_solver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("camera.txt");
    let settings = settings(&out);

    let mut collector = ObservationCollector::new(&settings, FixedLayoutDetector, NoRefinement);
    let err = run_batch(&mut collector, &mut Frames { remaining: 10 }, |_| {}).unwrap_err();
    assert!(matches!(
        err,
        SessionError::InsufficientObservations {
            accepted: 10,
            required: 15
        }
    ));
    assert!(collector.finish().is_err());
    assert!(!out.exists());
}

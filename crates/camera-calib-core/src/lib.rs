//! Capture session and calibration data lifecycle for planar camera
//! calibration.
//!
//! This crate owns the parts with real invariants: validated settings,
//! reference geometry, the capture state machine, the engine that hands
//! observations to a solver, the plain-text parameter file and point
//! undistortion. Pattern detection, sub-pixel refinement and the numerical
//! solver are reached only through the traits in [`traits`]; concrete
//! implementations live in `camera-calib-detect` and `camera-calib-solver`.
//!
//! ## Flow
//!
//! ```text
//! SettingsFile ─validate─▶ CalibrationSettings
//!      │
//!      ▼
//! ObservationCollector ──finish──▶ ObservationSet ──▶ CalibrationEngine ──▶ CameraParameters
//!                                                                              │
//!                                                          store::save / PointUndistorter
//! ```

mod collector;
mod engine;
mod homography;
mod image;
mod logger;
mod observation;
mod params;
mod reference;
pub mod session;
mod settings;
pub mod store;
pub mod traits;
mod undistort;

pub use collector::{CaptureState, ObservationCollector, UserRefusal};
pub use engine::{CalibrationEngine, CalibrationError};
pub use homography::{estimate_homography, Homography};
pub use image::{GrayImage, GrayImageView, ImageSize};
pub use observation::{Observation, ObservationSet, PointCountMismatch};
pub use params::{
    project_point, CameraParameters, DistortionCoefficients, ParamsError,
    DEFAULT_DISTORTION_LENGTH, SUPPORTED_DISTORTION_LENGTHS,
};
pub use reference::{
    generate as generate_reference_points, generate_for_pattern as generate_pattern_points,
    ReferencePoints,
};
pub use session::{
    run_batch, run_interactive, FrameError, FrameSource, Key, KeyInput, SessionError,
    SessionEvent, SessionOutcome, FRAME_INTERVAL,
};
pub use settings::{
    BoardSize, CalibrationSettings, GridPattern, ImageSourceKind, SettingsError, SettingsFile,
    SettingsIoError, DEFAULT_REQUIRED_OBSERVATIONS, MAX_BOARD_POINTS,
};
pub use store::StoreError;
pub use traits::{
    CalibrationSolver, NoRefinement, PatternDetector, RefineParams, SolverError, SolverInput,
    SolverOutput, SubpixelRefiner, TerminationCriteria,
};
pub use undistort::{optimal_new_camera_matrix, undistort_point, PointUndistorter, UndistortError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, init_with_verbosity, level_for_verbosity};

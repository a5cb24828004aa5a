//! Camera calibration from chessboard and circle grid images.
//!
//! This crate ties the workspace together:
//! - re-exports of the session core, the pattern detectors and the solver
//! - image sources for directory and image-sequence input
//! - the settings wizard and the session runner used by the `camera-calib`
//!   binary
//!
//! ## Quickstart
//!
//! ```no_run
//! use camera_calib::{CalibrationSettings, Pipeline, SettingsFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = SettingsFile::load_json("settings.json")?;
//! let settings = CalibrationSettings::validate(&raw)?;
//! let pipeline = Pipeline::for_settings(&settings)?;
//! let params = pipeline.run_directory(&settings, &mut std::io::stdout())?;
//! println!("{params}");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `camera_calib::core`: settings, capture state machine, engine, parameter
//!   file, point undistortion.
//! - `camera_calib::detect`: chessboard and circle grid detectors, corner
//!   refinement.
//! - `camera_calib::solver`: planar calibration solver.
//! - `camera_calib::source`: directory and image-sequence frame sources.
//! - `camera_calib::keys` (feature `cli`): capture keys from the terminal.

pub use camera_calib_core as core;
pub use camera_calib_detect as detect;
pub use camera_calib_solver as solver;

pub use camera_calib_core::{
    store, CalibrationSettings, CameraParameters, GridPattern, PointUndistorter, SettingsFile,
};
pub use camera_calib_detect::GridDetector;
pub use camera_calib_solver::PlanarSolver;

#[cfg(feature = "cli")]
pub mod keys;
mod run;
pub mod source;
pub mod wizard;

pub use run::{Pipeline, RunError, RunOutcome};
pub use source::{open_stream, DirectorySource, ImageSequenceSource, SourceError};
pub use wizard::{confirm_start, create_settings_file, WizardError};

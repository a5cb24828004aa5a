//! Pattern detectors for planar calibration targets.
//!
//! - [`ChessboardDetector`] finds inner corners of a chessboard with the
//!   `chess-corners` ChESS detector.
//! - [`CircleGridDetector`] finds circle centres by multi-threshold blob
//!   extraction, for symmetric and asymmetric layouts.
//! - [`CornerRefiner`] moves chessboard corners to sub-pixel accuracy by
//!   local re-detection with a saddle-point fit.
//!
//! Both detectors hand their unordered points to the same grid assembly
//! step, which returns them in board scan order (row by row, left to
//! right) or reports the board as not found.

mod blob;
mod chessboard;
mod circles;
mod grid;
mod subpix;

pub use blob::{detect_blobs, Blob, BlobDetectorParams};
pub use chessboard::{ChessboardDetector, ChessboardParams, CornerCandidate};
pub use circles::{CircleGridDetector, CircleLayout};
pub use grid::assemble_grid;
pub use subpix::CornerRefiner;

use camera_calib_core::{
    BoardSize, CalibrationSettings, GrayImageView, GridPattern, PatternDetector,
};
use log::{info, warn};
use nalgebra::Point2;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum DetectorConfigError {
    #[error("unable to open circle detector settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid circle detector settings JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Detector selected by the configured pattern.
#[derive(Clone, Debug)]
pub enum GridDetector {
    Chessboard(ChessboardDetector),
    Circles(CircleGridDetector),
}

impl GridDetector {
    /// Builds the detector for `settings.pattern()`. Circle patterns read
    /// their blob parameters from the configured circle detector file.
    pub fn for_settings(settings: &CalibrationSettings) -> Result<Self, DetectorConfigError> {
        let layout = match settings.pattern() {
            GridPattern::Chessboard => {
                return Ok(GridDetector::Chessboard(ChessboardDetector::default()));
            }
            GridPattern::SymmetricCircleGrid => CircleLayout::Symmetric,
            GridPattern::AsymmetricCircleGrid => CircleLayout::Asymmetric,
        };

        let params = match settings.circle_detector_settings_path() {
            Some(path) => {
                let params = BlobDetectorParams::load_json(path)?;
                info!("loaded circle detector settings from {}", path.display());
                params
            }
            None => {
                warn!("no circle detector settings configured, using defaults");
                BlobDetectorParams::default()
            }
        };
        Ok(GridDetector::Circles(CircleGridDetector::new(params, layout)))
    }
}

impl PatternDetector for GridDetector {
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        match self {
            GridDetector::Chessboard(d) => d.detect(image, board),
            GridDetector::Circles(d) => d.detect(image, board),
        }
    }
}

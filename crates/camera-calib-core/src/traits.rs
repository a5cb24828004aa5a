//! Collaborator seams: pattern detection, sub-pixel refinement and the
//! numerical solver. The capture state machine and the engine only see
//! these traits; concrete implementations live in sibling crates and test
//! doubles live next to the tests.

use crate::image::{GrayImageView, ImageSize};
use crate::params::DistortionCoefficients;
use crate::reference::ReferencePoints;
use crate::settings::BoardSize;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Finds the ordered feature points of a board in one frame.
pub trait PatternDetector {
    /// `Some(points)` in board scan order when the pattern was found,
    /// `None` otherwise.
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>>;
}

impl<T: PatternDetector + ?Sized> PatternDetector for &T {
    fn detect(&self, image: &GrayImageView<'_>, board: BoardSize) -> Option<Vec<Point2<f64>>> {
        (**self).detect(image, board)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerminationCriteria {
    pub max_iterations: usize,
    /// Stop once a refinement step moves less than this many pixels.
    pub epsilon: f64,
}

impl Default for TerminationCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            epsilon: 1e-3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineParams {
    /// Half side of the search window, in pixels.
    pub search_window: usize,
    /// Half side of the dead zone in the middle of the window; `None`
    /// disables it.
    pub zero_zone: Option<usize>,
    pub criteria: TerminationCriteria,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            search_window: 5,
            zero_zone: None,
            criteria: TerminationCriteria::default(),
        }
    }
}

/// In-place sub-pixel refinement of detected feature locations.
pub trait SubpixelRefiner {
    fn refine(&self, image: &GrayImageView<'_>, points: &mut [Point2<f64>], params: &RefineParams);
}

impl<T: SubpixelRefiner + ?Sized> SubpixelRefiner for &T {
    fn refine(&self, image: &GrayImageView<'_>, points: &mut [Point2<f64>], params: &RefineParams) {
        (**self).refine(image, points, params)
    }
}

/// Leaves points untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRefinement;

impl SubpixelRefiner for NoRefinement {
    fn refine(
        &self,
        _image: &GrayImageView<'_>,
        _points: &mut [Point2<f64>],
        _params: &RefineParams,
    ) {
    }
}

/// Per-view correspondences handed to a solver.
#[derive(Clone, Debug)]
pub struct SolverInput {
    pub object_points: Vec<ReferencePoints>,
    pub image_points: Vec<Vec<Point2<f64>>>,
    pub image_size: ImageSize,
    /// Starting distortion; its length fixes the model of the result.
    pub initial_distortion: DistortionCoefficients,
}

#[derive(Clone, Debug)]
pub struct SolverOutput {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: DistortionCoefficients,
    pub rotation_vectors: Vec<Vector3<f64>>,
    pub translation_vectors: Vec<Vector3<f64>>,
    pub rms_error: Option<f64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid solver input: {0}")]
    InvalidInput(String),
    #[error("degenerate point configuration: {0}")]
    Degenerate(String),
    #[error("optimisation did not converge: {0}")]
    NotConverged(String),
}

/// Fits intrinsics and poses to planar correspondences.
pub trait CalibrationSolver {
    fn solve(&self, input: &SolverInput) -> Result<SolverOutput, SolverError>;
}

impl<T: CalibrationSolver + ?Sized> CalibrationSolver for &T {
    fn solve(&self, input: &SolverInput) -> Result<SolverOutput, SolverError> {
        (**self).solve(input)
    }
}

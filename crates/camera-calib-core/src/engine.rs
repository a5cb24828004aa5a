//! Bridges a finalized session to the numerical solver.

use crate::image::ImageSize;
use crate::observation::{Observation, ObservationSet};
use crate::params::{
    CameraParameters, DistortionCoefficients, ParamsError, DEFAULT_DISTORTION_LENGTH,
};
use crate::reference::ReferencePoints;
use crate::traits::{CalibrationSolver, SolverError, SolverInput};
use log::info;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no observations to calibrate from")]
    NoObservations,
    #[error("image size is unspecified")]
    UnspecifiedImageSize,
    #[error("observation {index} has {found} image points, reference has {expected}")]
    PointCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("calibration solver failed: {0}")]
    Solver(#[from] SolverError),
    #[error("solver returned {rotations} rotations and {translations} translations for {observations} observations")]
    PoseCountMismatch {
        observations: usize,
        rotations: usize,
        translations: usize,
    },
    #[error("solver returned {found} distortion coefficients, expected {expected}")]
    DistortionLengthMismatch { expected: usize, found: usize },
    #[error("solver returned invalid parameters: {0}")]
    InvalidResult(#[from] ParamsError),
}

/// Owns a solver and the distortion model length used for every solve.
#[derive(Clone, Debug)]
pub struct CalibrationEngine<S> {
    solver: S,
    distortion_length: usize,
}

impl<S: CalibrationSolver> CalibrationEngine<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            distortion_length: DEFAULT_DISTORTION_LENGTH,
        }
    }

    /// Use a different distortion model length (4, 5, 8 or 12).
    pub fn with_distortion_length(mut self, len: usize) -> Result<Self, ParamsError> {
        DistortionCoefficients::zeros(len)?;
        self.distortion_length = len;
        Ok(self)
    }

    pub fn distortion_length(&self) -> usize {
        self.distortion_length
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Solve for intrinsics. Rotation and translation vectors come back in
    /// observation order. Failures are reported, never retried.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, reference, observations),
            fields(views = observations.len())
        )
    )]
    pub fn solve(
        &self,
        reference: &ReferencePoints,
        observations: Vec<Observation>,
        image_size: ImageSize,
    ) -> Result<CameraParameters, CalibrationError> {
        if observations.is_empty() {
            return Err(CalibrationError::NoObservations);
        }
        if image_size.is_unspecified() {
            return Err(CalibrationError::UnspecifiedImageSize);
        }
        for (index, obs) in observations.iter().enumerate() {
            if obs.len() != reference.len() {
                return Err(CalibrationError::PointCountMismatch {
                    index,
                    expected: reference.len(),
                    found: obs.len(),
                });
            }
        }

        let views = observations.len();
        let input = SolverInput {
            object_points: vec![reference.clone(); views],
            image_points: observations
                .into_iter()
                .map(Observation::into_image_points)
                .collect(),
            image_size,
            initial_distortion: DistortionCoefficients::zeros(self.distortion_length)?,
        };

        info!("camera calibration has started ({views} views, image {image_size})");
        let out = self.solver.solve(&input)?;

        if out.rotation_vectors.len() != views || out.translation_vectors.len() != views {
            return Err(CalibrationError::PoseCountMismatch {
                observations: views,
                rotations: out.rotation_vectors.len(),
                translations: out.translation_vectors.len(),
            });
        }
        if out.distortion.len() != self.distortion_length {
            return Err(CalibrationError::DistortionLengthMismatch {
                expected: self.distortion_length,
                found: out.distortion.len(),
            });
        }
        if !out.camera_matrix.iter().all(|v| v.is_finite()) {
            return Err(ParamsError::NonFinite.into());
        }

        match out.rms_error {
            Some(rms) => info!(
                "camera calibration has been completed, rms reprojection error {rms:.4} px"
            ),
            None => info!("camera calibration has been completed"),
        }
        Ok(CameraParameters::from_solve(
            out.camera_matrix,
            out.distortion,
            out.rotation_vectors,
            out.translation_vectors,
            out.rms_error,
        ))
    }

    pub fn solve_set(&self, set: ObservationSet) -> Result<CameraParameters, CalibrationError> {
        self.solve(&set.reference, set.observations, set.image_size)
    }
}

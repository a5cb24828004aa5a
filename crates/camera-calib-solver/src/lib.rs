//! Planar calibration solver.
//!
//! [`PlanarSolver`] implements [`camera_calib_core::CalibrationSolver`]:
//!
//! 1. one plane homography per view,
//! 2. focal lengths from the homographies with the principal point at the
//!    image centre, and a pose per view,
//! 3. Levenberg-Marquardt from the `levenberg-marquardt` crate over
//!    intrinsics, the leading distortion terms and all poses, minimising
//!    pixel reprojection error.
//!
//! The reported RMS error is `sqrt(Σ‖residual‖² / point count)`.

mod init;
mod planar;

pub use init::{initial_camera_matrix, pose_from_homography};
pub use planar::{LmOptions, PlanarSolver, PlanarSolverOptions};

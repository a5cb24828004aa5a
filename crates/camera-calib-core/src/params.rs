//! Camera model: pinhole intrinsics plus the rational/thin-prism lens
//! distortion model.
//!
//! Coefficient order is `k1, k2, p1, p2[, k3[, k4, k5, k6[, s1, s2, s3, s4]]]`.
//! Missing trailing terms are zero.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lengths the distortion model understands.
pub const SUPPORTED_DISTORTION_LENGTHS: [usize; 4] = [4, 5, 8, 12];

/// Length used for a fresh solve: radial k1..k3, tangential p1/p2 and the
/// rational denominator k4..k6.
pub const DEFAULT_DISTORTION_LENGTH: usize = 8;

const UNDISTORT_MAX_ITERATIONS: usize = 20;
const UNDISTORT_EPSILON: f64 = 1e-12;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParamsError {
    #[error("unsupported distortion vector length {0} (expected one of 4, 5, 8, 12)")]
    UnsupportedDistortionLength(usize),
    #[error("camera parameters contain non-finite values")]
    NonFinite,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoefficients(Vec<f64>);

impl DistortionCoefficients {
    pub fn new(values: Vec<f64>) -> Result<Self, ParamsError> {
        if !SUPPORTED_DISTORTION_LENGTHS.contains(&values.len()) {
            return Err(ParamsError::UnsupportedDistortionLength(values.len()));
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(ParamsError::NonFinite);
        }
        Ok(Self(values))
    }

    pub fn zeros(len: usize) -> Result<Self, ParamsError> {
        Self::new(vec![0.0; len])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    #[inline]
    fn coeff(&self, i: usize) -> f64 {
        self.0.get(i).copied().unwrap_or(0.0)
    }

    /// Apply lens distortion to a normalized image point.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let (s1, s2, s3, s4) = (self.coeff(8), self.coeff(9), self.coeff(10), self.coeff(11));

        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        Point2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x) + s1 * r2 + s2 * r4,
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y + s3 * r2 + s4 * r4,
        )
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    pub fn undistort(&self, distorted: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return distorted;
        }
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let (s1, s2, s3, s4) = (self.coeff(8), self.coeff(9), self.coeff(10), self.coeff(11));

        let (x0, y0) = (distorted.x, distorted.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let r2 = x * x + y * y;
            let icdist = (1.0 + ((k6 * r2 + k5) * r2 + k4) * r2)
                / (1.0 + ((k3 * r2 + k2) * r2 + k1) * r2);
            if icdist < 0.0 {
                // outside the model's invertible region
                return distorted;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x) + s1 * r2 + s2 * r2 * r2;
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y + s3 * r2 + s4 * r2 * r2;
            let nx = (x0 - dx) * icdist;
            let ny = (y0 - dy) * icdist;
            let step = (nx - x).powi(2) + (ny - y).powi(2);
            x = nx;
            y = ny;
            if step < UNDISTORT_EPSILON * UNDISTORT_EPSILON {
                break;
            }
        }
        Point2::new(x, y)
    }
}

/// Project a board point through pose `(rvec, tvec)`, distortion and `k`.
///
/// `rvec` is a Rodrigues vector (axis scaled by angle).
pub fn project_point(
    k: &Matrix3<f64>,
    distortion: &DistortionCoefficients,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    point: &Point3<f64>,
) -> Point2<f64> {
    let pc = Rotation3::from_scaled_axis(*rvec) * point.coords + tvec;
    let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
    let d = distortion.distort(n);
    Point2::new(
        k[(0, 0)] * d.x + k[(0, 1)] * d.y + k[(0, 2)],
        k[(1, 1)] * d.y + k[(1, 2)],
    )
}

/// Solved (or loaded) intrinsics with per-observation poses.
///
/// Poses and the RMS reprojection error only exist for parameters that
/// came out of a solve; the persisted format drops them.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraParameters {
    camera_matrix: Matrix3<f64>,
    distortion: DistortionCoefficients,
    rotation_vectors: Vec<Vector3<f64>>,
    translation_vectors: Vec<Vector3<f64>>,
    rms_error: Option<f64>,
}

impl CameraParameters {
    /// Intrinsics without pose information, e.g. read back from disk.
    pub fn from_intrinsics(
        camera_matrix: Matrix3<f64>,
        distortion: DistortionCoefficients,
    ) -> Result<Self, ParamsError> {
        if !camera_matrix.iter().all(|v| v.is_finite()) {
            return Err(ParamsError::NonFinite);
        }
        Ok(Self {
            camera_matrix,
            distortion,
            rotation_vectors: Vec::new(),
            translation_vectors: Vec::new(),
            rms_error: None,
        })
    }

    pub(crate) fn from_solve(
        camera_matrix: Matrix3<f64>,
        distortion: DistortionCoefficients,
        rotation_vectors: Vec<Vector3<f64>>,
        translation_vectors: Vec<Vector3<f64>>,
        rms_error: Option<f64>,
    ) -> Self {
        Self {
            camera_matrix,
            distortion,
            rotation_vectors,
            translation_vectors,
            rms_error,
        }
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &DistortionCoefficients {
        &self.distortion
    }

    pub fn rotation_vectors(&self) -> &[Vector3<f64>] {
        &self.rotation_vectors
    }

    pub fn translation_vectors(&self) -> &[Vector3<f64>] {
        &self.translation_vectors
    }

    pub fn rms_error(&self) -> Option<f64> {
        self.rms_error
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[(1, 2)]
    }
}

impl fmt::Display for CameraParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "camera matrix:")?;
        for r in 0..3 {
            writeln!(
                f,
                "  [{:>14.6} {:>14.6} {:>14.6}]",
                self.camera_matrix[(r, 0)],
                self.camera_matrix[(r, 1)],
                self.camera_matrix[(r, 2)]
            )?;
        }
        write!(f, "distortion coefficients ({}):", self.distortion.len())?;
        for v in self.distortion.as_slice() {
            write!(f, " {v:.6}")?;
        }
        if let Some(rms) = self.rms_error {
            write!(f, "\nrms reprojection error: {rms:.4} px")?;
        }
        Ok(())
    }
}

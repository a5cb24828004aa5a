//! Distorted pixel → ideal pinhole pixel mapping.

use crate::image::ImageSize;
use crate::params::{CameraParameters, DistortionCoefficients};
use nalgebra::{Matrix3, Point2, Vector3};

/// Samples per side of the border grid used to bound the undistorted image.
const BORDER_GRID: usize = 9;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("camera matrix is singular")]
    SingularCameraMatrix,
    #[error("free scaling parameter must be in [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("undistortion produced non-finite coordinates")]
    NonFinite,
}

fn normalize(k_inv: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    let v = k_inv * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v[0] / v[2], v[1] / v[2])
}

/// Camera matrix for an undistorted image of `new_size`.
///
/// `alpha = 0` keeps only valid pixels (no black border), `alpha = 1` keeps
/// every source pixel. Intermediate values blend the two.
pub fn optimal_new_camera_matrix(
    params: &CameraParameters,
    image_size: ImageSize,
    alpha: f64,
    new_size: ImageSize,
) -> Result<Matrix3<f64>, UndistortError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(UndistortError::InvalidAlpha(alpha));
    }
    let k_inv = params
        .camera_matrix()
        .try_inverse()
        .ok_or(UndistortError::SingularCameraMatrix)?;
    let dist = params.distortion();

    let (w, h) = (image_size.width as f64, image_size.height as f64);
    let n = BORDER_GRID;
    let (mut ox0, mut oy0, mut ox1, mut oy1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    let (mut ix0, mut iy0, mut ix1, mut iy1) = (f64::MIN, f64::MIN, f64::MAX, f64::MAX);
    for y in 0..n {
        for x in 0..n {
            let px = Point2::new(
                x as f64 * (w - 1.0) / (n - 1) as f64,
                y as f64 * (h - 1.0) / (n - 1) as f64,
            );
            let p = dist.undistort(normalize(&k_inv, px));
            ox0 = ox0.min(p.x);
            ox1 = ox1.max(p.x);
            oy0 = oy0.min(p.y);
            oy1 = oy1.max(p.y);
            if x == 0 {
                ix0 = ix0.max(p.x);
            }
            if x == n - 1 {
                ix1 = ix1.min(p.x);
            }
            if y == 0 {
                iy0 = iy0.max(p.y);
            }
            if y == n - 1 {
                iy1 = iy1.min(p.y);
            }
        }
    }

    let (nw, nh) = (new_size.width as f64, new_size.height as f64);
    let fit = |x0: f64, y0: f64, x1: f64, y1: f64| {
        let fx = (nw - 1.0) / (x1 - x0);
        let fy = (nh - 1.0) / (y1 - y0);
        (fx, fy, -fx * x0, -fy * y0)
    };
    let (fx0, fy0, cx0, cy0) = fit(ix0, iy0, ix1, iy1);
    let (fx1, fy1, cx1, cy1) = fit(ox0, oy0, ox1, oy1);
    let blend = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;

    let m = Matrix3::new(
        blend(fx0, fx1),
        0.0,
        blend(cx0, cx1),
        0.0,
        blend(fy0, fy1),
        blend(cy0, cy1),
        0.0,
        0.0,
        1.0,
    );
    if !m.iter().all(|v| v.is_finite()) {
        return Err(UndistortError::NonFinite);
    }
    Ok(m)
}

/// Reusable undistortion mapping for one parameter set and target size.
#[derive(Clone, Debug)]
pub struct PointUndistorter {
    k_inv: Matrix3<f64>,
    distortion: DistortionCoefficients,
    output_matrix: Matrix3<f64>,
}

impl PointUndistorter {
    /// With no target (or [`ImageSize::UNSPECIFIED`]) the output uses the
    /// raw camera matrix; otherwise the optimal matrix for that size with
    /// every source pixel kept.
    pub fn new(
        params: &CameraParameters,
        target: Option<ImageSize>,
    ) -> Result<Self, UndistortError> {
        let k = *params.camera_matrix();
        let k_inv = k
            .try_inverse()
            .ok_or(UndistortError::SingularCameraMatrix)?;
        let output_matrix = match target.filter(|t| !t.is_unspecified()) {
            Some(size) => optimal_new_camera_matrix(params, size, 1.0, size)?,
            None => k,
        };
        Ok(Self {
            k_inv,
            distortion: params.distortion().clone(),
            output_matrix,
        })
    }

    pub fn output_matrix(&self) -> &Matrix3<f64> {
        &self.output_matrix
    }

    pub fn undistort(&self, point: Point2<f64>) -> Result<Point2<f64>, UndistortError> {
        let n = self.distortion.undistort(normalize(&self.k_inv, point));
        let v = self.output_matrix * Vector3::new(n.x, n.y, 1.0);
        let out = Point2::new(v[0] / v[2], v[1] / v[2]);
        if !(out.x.is_finite() && out.y.is_finite()) {
            return Err(UndistortError::NonFinite);
        }
        Ok(out)
    }
}

/// One-shot form of [`PointUndistorter`].
pub fn undistort_point(
    point: Point2<f64>,
    params: &CameraParameters,
    target: Option<ImageSize>,
) -> Result<Point2<f64>, UndistortError> {
    PointUndistorter::new(params, target)?.undistort(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::project_point;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn k() -> Matrix3<f64> {
        Matrix3::new(800.0, 0.0, 320.0, 0.0, 780.0, 240.0, 0.0, 0.0, 1.0)
    }

    fn params(dist: Vec<f64>) -> CameraParameters {
        CameraParameters::from_intrinsics(k(), DistortionCoefficients::new(dist).expect("coeffs"))
            .expect("params")
    }

    #[test]
    fn zero_distortion_is_identity() {
        let p = params(vec![0.0; 5]);
        let q = Point2::new(123.25, 401.5);
        for target in [None, Some(ImageSize::UNSPECIFIED)] {
            let out = undistort_point(q, &p, target).expect("undistort");
            assert_relative_eq!(out.x, q.x, epsilon = 1e-9);
            assert_relative_eq!(out.y, q.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn optimal_matrix_without_distortion_matches_camera_matrix() {
        let p = params(vec![0.0; 8]);
        let size = ImageSize::new(640, 480);
        let m = optimal_new_camera_matrix(&p, size, 1.0, size).expect("matrix");
        for (a, b) in m.iter().zip(k().iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn undistort_recovers_ideal_projection() {
        let p = params(vec![-0.25, 0.08, 0.001, -0.0007, 0.0]);
        let ideal = params(vec![0.0; 5]);
        let rvec = nalgebra::Vector3::new(0.1, -0.2, 0.05);
        let tvec = nalgebra::Vector3::new(-0.05, 0.02, 0.8);
        for pt in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.1, 0.05, 0.0),
            Point3::new(-0.08, 0.12, 0.0),
        ] {
            let distorted = project_point(p.camera_matrix(), p.distortion(), &rvec, &tvec, &pt);
            let expected = project_point(
                ideal.camera_matrix(),
                ideal.distortion(),
                &rvec,
                &tvec,
                &pt,
            );
            let out = undistort_point(distorted, &p, None).expect("undistort");
            assert_relative_eq!(out.x, expected.x, epsilon = 1e-6);
            assert_relative_eq!(out.y, expected.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn target_size_uses_adjusted_matrix() {
        let p = params(vec![-0.3, 0.1, 0.0, 0.0, 0.0]);
        let target = ImageSize::new(1280, 960);
        let u = PointUndistorter::new(&p, Some(target)).expect("undistorter");
        assert!(u.output_matrix() != p.camera_matrix());
        // barrel distortion: keeping every source pixel shrinks the focal length
        assert!(u.output_matrix()[(0, 0)] < 2.0 * 800.0);
        let out = u.undistort(Point2::new(640.0, 480.0)).expect("undistort");
        assert!(out.x.is_finite() && out.y.is_finite());
    }

    #[test]
    fn singular_camera_matrix_is_reported() {
        let p = CameraParameters::from_intrinsics(
            Matrix3::zeros(),
            DistortionCoefficients::zeros(4).expect("coeffs"),
        )
        .expect("finite");
        assert_eq!(
            undistort_point(Point2::origin(), &p, None),
            Err(UndistortError::SingularCameraMatrix)
        );
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let p = params(vec![0.0; 4]);
        let size = ImageSize::new(64, 48);
        assert_eq!(
            optimal_new_camera_matrix(&p, size, 1.5, size),
            Err(UndistortError::InvalidAlpha(1.5))
        );
    }
}

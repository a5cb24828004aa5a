//! Closed-form starting point: focal lengths from plane homographies with
//! the principal point fixed at the image centre, then one pose per view.

use camera_calib_core::ImageSize;
use log::warn;
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, Vector3};

/// Camera matrix from per-view homographies (board plane → image).
///
/// Each homography contributes two orthogonality constraints on the
/// image of the absolute conic; with the principal point fixed only
/// `1/fx²` and `1/fy²` remain unknown. Falls back to `max(w, h)` when
/// the views do not constrain the focal lengths.
pub fn initial_camera_matrix(homographies: &[Matrix3<f64>], image_size: ImageSize) -> Matrix3<f64> {
    let cx = (image_size.width as f64 - 1.0) * 0.5;
    let cy = (image_size.height as f64 - 1.0) * 0.5;
    let fallback = image_size.width.max(image_size.height) as f64;

    let mut a = DMatrix::zeros(2 * homographies.len(), 2);
    let mut b = DVector::zeros(2 * homographies.len());
    for (i, h) in homographies.iter().enumerate() {
        let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
        let hc = shift * h;
        let col0: Vector3<f64> = hc.column(0).into_owned();
        let col1: Vector3<f64> = hc.column(1).into_owned();
        let unit = |v: Vector3<f64>| {
            let n = v.norm();
            if n > 0.0 {
                v / n
            } else {
                v
            }
        };
        let h0 = unit(col0);
        let v0 = unit(col1);
        let d1 = unit((col0 + col1) * 0.5);
        let d2 = unit((col0 - col1) * 0.5);

        a[(2 * i, 0)] = h0.x * v0.x;
        a[(2 * i, 1)] = h0.y * v0.y;
        b[2 * i] = -h0.z * v0.z;
        a[(2 * i + 1, 0)] = d1.x * d2.x;
        a[(2 * i + 1, 1)] = d1.y * d2.y;
        b[2 * i + 1] = -d1.z * d2.z;
    }

    let focal = (!homographies.is_empty())
        .then(|| a.svd(true, true))
        .and_then(|svd| svd.solve(&b, 1e-12).ok())
        .map(|f| ((1.0 / f[0]).abs().sqrt(), (1.0 / f[1]).abs().sqrt()))
        .filter(|(fx, fy)| fx.is_finite() && fy.is_finite() && *fx > 0.0 && *fy > 0.0);
    let (fx, fy) = focal.unwrap_or_else(|| {
        warn!("views do not constrain the focal length, starting from {fallback}");
        (fallback, fallback)
    });

    Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
}

/// Board pose (rotation vector, translation) from a plane homography.
pub fn pose_from_homography(
    k: &Matrix3<f64>,
    h: &Matrix3<f64>,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let k_inv = k.try_inverse()?;
    let kh1 = k_inv * h.column(0);
    let kh2 = k_inv * h.column(1);
    let kh3 = k_inv * h.column(2);

    let n1 = kh1.norm();
    if n1 <= 1e-12 || kh2.norm() <= 1e-12 {
        return None;
    }
    let lambda = 1.0 / n1;
    let mut r1 = kh1 * lambda;
    let mut r2 = kh2 * lambda;
    let mut t = kh3 * lambda;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let mut r = Matrix3::zeros();
    r.set_column(0, &r1);
    r.set_column(1, &r2);
    r.set_column(2, &r3);

    // nearest rotation in the Frobenius sense
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u = u;
        let flipped = -u.column(2);
        u.set_column(2, &flipped);
        rot = u * v_t;
    }
    let rvec = Rotation3::from_matrix_unchecked(rot).scaled_axis();
    Some((rvec, t))
}

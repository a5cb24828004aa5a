use crate::init::{initial_camera_matrix, pose_from_homography};
use camera_calib_core::{
    estimate_homography, project_point, CalibrationSolver, DistortionCoefficients, SolverError,
    SolverInput, SolverOutput,
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::{debug, info, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const INTRINSIC_PARAMS: usize = 4;
const POSE_PARAMS: usize = 6;

/// Stopping rules handed to [`LevenbergMarquardt`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Relative tolerance on the cost reduction.
    pub ftol: f64,
    /// Relative tolerance on the step length.
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: f64,
    /// Residual evaluations allowed per parameter.
    pub patience: usize,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            patience: 100,
        }
    }
}

impl LmOptions {
    fn solver(&self) -> LevenbergMarquardt<f64> {
        LevenbergMarquardt::new()
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .with_patience(self.patience.max(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarSolverOptions {
    /// Leading distortion coefficients that are estimated (`k1, k2, p1,
    /// p2, k3`); the rest keep their initial values.
    pub estimated_distortion_terms: usize,
    pub lm: LmOptions,
}

impl Default for PlanarSolverOptions {
    fn default() -> Self {
        Self {
            estimated_distortion_terms: 5,
            lm: LmOptions::default(),
        }
    }
}

/// Zhang-style planar calibration: closed-form initial intrinsics and
/// poses, then joint reprojection-error refinement of intrinsics,
/// distortion and every view's pose.
#[derive(Clone, Debug, Default)]
pub struct PlanarSolver {
    pub options: PlanarSolverOptions,
}

impl PlanarSolver {
    pub fn new(options: PlanarSolverOptions) -> Self {
        Self { options }
    }
}

struct View<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    row_offset: usize,
}

/// Parameter vector: `fx, fy, cx, cy`, the estimated distortion terms,
/// then `rvec, tvec` per view.
struct ReprojectionProblem<'a> {
    views: Vec<View<'a>>,
    rows: usize,
    distortion_template: Vec<f64>,
    estimated_terms: usize,
}

impl ReprojectionProblem<'_> {
    fn intrinsics_len(&self) -> usize {
        INTRINSIC_PARAMS + self.estimated_terms
    }

    fn camera(&self, x: &DVector<f64>) -> Option<(Matrix3<f64>, DistortionCoefficients)> {
        let k = Matrix3::new(x[0], 0.0, x[2], 0.0, x[1], x[3], 0.0, 0.0, 1.0);
        let mut values = self.distortion_template.clone();
        for (i, v) in values.iter_mut().take(self.estimated_terms).enumerate() {
            *v = x[INTRINSIC_PARAMS + i];
        }
        let dist = DistortionCoefficients::new(values).ok()?;
        k.iter().all(|v| v.is_finite()).then_some((k, dist))
    }

    fn pose(&self, x: &DVector<f64>, view: usize) -> (Vector3<f64>, Vector3<f64>) {
        let o = self.intrinsics_len() + POSE_PARAMS * view;
        (
            Vector3::new(x[o], x[o + 1], x[o + 2]),
            Vector3::new(x[o + 3], x[o + 4], x[o + 5]),
        )
    }

    fn view_residuals(
        &self,
        x: &DVector<f64>,
        view: usize,
        k: &Matrix3<f64>,
        dist: &DistortionCoefficients,
        out: &mut [f64],
    ) -> Option<()> {
        let (rvec, tvec) = self.pose(x, view);
        let v = &self.views[view];
        for (i, (obj, img)) in v.object.iter().zip(v.image).enumerate() {
            let p = project_point(k, dist, &rvec, &tvec, obj);
            let (dx, dy) = (p.x - img.x, p.y - img.y);
            if !(dx.is_finite() && dy.is_finite()) {
                return None;
            }
            out[2 * i] = dx;
            out[2 * i + 1] = dy;
        }
        Some(())
    }

    fn step(value: f64) -> f64 {
        1e-6 * value.abs().max(1.0)
    }
}

impl ReprojectionProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let (k, dist) = self.camera(x)?;
        let mut r = DVector::zeros(self.rows);
        for (vi, v) in self.views.iter().enumerate() {
            let len = 2 * v.image.len();
            let rows = &mut r.as_mut_slice()[v.row_offset..v.row_offset + len];
            self.view_residuals(x, vi, &k, &dist, rows)?;
        }
        Some(r)
    }

    /// Central differences; pose columns only touch their own view's rows.
    fn jacobian(&self, x: &DVector<f64>) -> Option<DMatrix<f64>> {
        let mut j = DMatrix::zeros(self.rows, x.len());
        let mut xp = x.clone();

        for c in 0..self.intrinsics_len() {
            let h = Self::step(x[c]);
            xp[c] = x[c] + h;
            let plus = self.residuals(&xp)?;
            xp[c] = x[c] - h;
            let minus = self.residuals(&xp)?;
            xp[c] = x[c];
            j.set_column(c, &((plus - minus) / (2.0 * h)));
        }

        let (k, dist) = self.camera(x)?;
        let mut plus = Vec::new();
        let mut minus = Vec::new();
        for (vi, v) in self.views.iter().enumerate() {
            let len = 2 * v.image.len();
            plus.resize(len, 0.0);
            minus.resize(len, 0.0);
            for p in 0..POSE_PARAMS {
                let c = self.intrinsics_len() + POSE_PARAMS * vi + p;
                let h = Self::step(x[c]);
                xp[c] = x[c] + h;
                self.view_residuals(&xp, vi, &k, &dist, &mut plus)?;
                xp[c] = x[c] - h;
                self.view_residuals(&xp, vi, &k, &dist, &mut minus)?;
                xp[c] = x[c];
                for row in 0..len {
                    j[(v.row_offset + row, c)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            }
        }
        Some(j)
    }
}

/// Holds the current parameters for [`LevenbergMarquardt`].
struct LmWrapper<'p, 'a> {
    problem: &'p ReprojectionProblem<'a>,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.problem.residuals(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        self.problem.jacobian(&self.params)
    }
}

fn validate(input: &SolverInput) -> Result<(), SolverError> {
    if input.object_points.is_empty() {
        return Err(SolverError::InvalidInput("no views".into()));
    }
    if input.object_points.len() != input.image_points.len() {
        return Err(SolverError::InvalidInput(format!(
            "{} reference sets for {} image point sets",
            input.object_points.len(),
            input.image_points.len()
        )));
    }
    if input.image_size.is_unspecified() {
        return Err(SolverError::InvalidInput("image size is unspecified".into()));
    }
    for (i, (obj, img)) in input.object_points.iter().zip(&input.image_points).enumerate() {
        if obj.len() != img.len() {
            return Err(SolverError::InvalidInput(format!(
                "view {i}: {} reference points, {} image points",
                obj.len(),
                img.len()
            )));
        }
        if obj.len() < 4 {
            return Err(SolverError::InvalidInput(format!(
                "view {i}: at least 4 points are required, got {}",
                obj.len()
            )));
        }
        if obj.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(SolverError::InvalidInput(format!(
                "view {i}: reference points are not planar (z = 0)"
            )));
        }
    }
    Ok(())
}

impl CalibrationSolver for PlanarSolver {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, input), fields(views = input.image_points.len()))
    )]
    fn solve(&self, input: &SolverInput) -> Result<SolverOutput, SolverError> {
        validate(input)?;

        let mut homographies = Vec::with_capacity(input.image_points.len());
        for (i, (obj, img)) in input.object_points.iter().zip(&input.image_points).enumerate() {
            let plane: Vec<Point2<f64>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
            let h = estimate_homography(&plane, img)
                .ok_or_else(|| SolverError::Degenerate(format!("view {i}: no plane homography")))?;
            homographies.push(h.h);
        }

        let k0 = initial_camera_matrix(&homographies, input.image_size);
        debug!("initial camera matrix: fx={:.3} fy={:.3}", k0[(0, 0)], k0[(1, 1)]);

        let template = input.initial_distortion.as_slice().to_vec();
        let estimated_terms = self.options.estimated_distortion_terms.min(template.len());

        let n_params = INTRINSIC_PARAMS + estimated_terms + POSE_PARAMS * homographies.len();
        let mut x0 = Vec::with_capacity(n_params);
        x0.extend_from_slice(&[k0[(0, 0)], k0[(1, 1)], k0[(0, 2)], k0[(1, 2)]]);
        x0.extend_from_slice(&template[..estimated_terms]);
        for (i, h) in homographies.iter().enumerate() {
            let (rvec, tvec) = pose_from_homography(&k0, h)
                .ok_or_else(|| SolverError::Degenerate(format!("view {i}: pose is undetermined")))?;
            x0.extend(rvec.iter().chain(tvec.iter()).copied());
        }

        let mut views = Vec::with_capacity(homographies.len());
        let mut rows = 0;
        for (obj, img) in input.object_points.iter().zip(&input.image_points) {
            views.push(View {
                object: obj.as_slice(),
                image: img,
                row_offset: rows,
            });
            rows += 2 * img.len();
        }
        let problem = ReprojectionProblem {
            views,
            rows,
            distortion_template: template,
            estimated_terms,
        };

        let x0 = DVector::from_vec(x0);
        if problem.residuals(&x0).is_none() {
            return Err(SolverError::Degenerate(
                "initial estimate does not project".into(),
            ));
        }
        let (fitted, report) = self.options.lm.solver().minimize(LmWrapper {
            problem: &problem,
            params: x0,
        });
        if !report.termination.was_successful() {
            warn!(
                "refinement stopped after {} evaluations: {:?}",
                report.number_of_evaluations, report.termination
            );
        }
        let x = fitted.params;

        let (camera_matrix, distortion) = problem
            .camera(&x)
            .ok_or_else(|| SolverError::NotConverged("non-finite intrinsics".into()))?;
        let residuals = problem
            .residuals(&x)
            .ok_or_else(|| SolverError::NotConverged("refined estimate does not project".into()))?;
        let point_count = (rows / 2) as f64;
        let rms = (residuals.norm_squared() / point_count).sqrt();
        if !rms.is_finite() {
            return Err(SolverError::NotConverged(
                "non-finite reprojection error".into(),
            ));
        }
        info!(
            "refinement finished after {} evaluations, RMS reprojection error {:.4} px",
            report.number_of_evaluations, rms
        );

        let (rotation_vectors, translation_vectors) = (0..problem.views.len())
            .map(|v| problem.pose(&x, v))
            .unzip();
        Ok(SolverOutput {
            camera_matrix,
            distortion,
            rotation_vectors,
            translation_vectors,
            rms_error: Some(rms),
        })
    }
}

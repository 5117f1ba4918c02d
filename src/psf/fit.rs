//! Levenberg–Marquardt PSF fitting.
//!
//! The minimizer is the MINPACK port of the `levenberg_marquardt` crate,
//! driven through a [`LeastSquaresProblem`] whose Jacobian is taken by
//! forward differences.
//!
//! Parameter vectors, in patch coordinates where sample `(i, j)` sits at
//! `(i, j)`:
//!
//! - elliptical: `[B, A, x0, y0, σx, σy, θ]`, plus `β` for variable Moffat
//! - circular: `[B, A, x0, y0, σ]`, plus `β` for variable Moffat
//!
//! Fixed-β Moffat and VariableShape fits carry their shape exponent outside
//! the parameter vector.

use std::cell::Cell;
use std::f64::consts::PI;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::geometry::Point;
use crate::numeric::{median, CubicSpline};

use super::{PsfData, PsfFitStatus, PsfFunction, QuadraticForm};

/// Residual returned for parameter vectors outside the admissible region.
const SATURATED_RESIDUAL: f64 = 1e30;
/// Largest admissible Moffat β.
const MAX_BETA: f64 = 10.0;
/// Largest relative change of a fitted β between evaluations.
const MAX_BETA_JUMP: f64 = 0.05;
/// Initial β of variable Moffat fits.
const INITIAL_BETA: f64 = 2.5;
/// Normalized profile level bounding the photometric support.
const SUPPORT_THRESHOLD: f64 = 1e-3;
/// Number of shape exponents sampled by the VariableShape search.
const SHAPE_SAMPLES: usize = 10;
const GOLDEN_RATIO: f64 = 1.61803398875;
const GOLDEN_TOLERANCE: f64 = 0.005;

/// Termination thresholds of the Levenberg–Marquardt minimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmConfig {
    /// Relative reduction of the sum of squares below which the fit stops.
    pub ftol: f64,
    /// Relative step length below which the fit stops.
    pub xtol: f64,
    /// Cosine between residuals and Jacobian columns below which the fit stops.
    pub gtol: f64,
    /// Residual evaluation budget, in units of `parameters + 1`.
    pub patience: usize,
    /// Relative step of the forward-difference Jacobian.
    pub diff_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            patience: 100,
            diff_step: f64::EPSILON.sqrt(),
        }
    }
}

/// Options of a PSF fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfFitConfig {
    pub function: PsfFunction,
    /// Fit a single σ and no rotation.
    pub circular: bool,
    /// Lower bound of the VariableShape exponent search.
    pub beta_min: f64,
    /// Upper bound of the VariableShape exponent search.
    pub beta_max: f64,
    pub lm: LmConfig,
}

impl Default for PsfFitConfig {
    fn default() -> Self {
        Self {
            function: PsfFunction::Gaussian,
            circular: false,
            beta_min: 1.0,
            beta_max: 6.0,
            lm: LmConfig::default(),
        }
    }
}

/// Fit a PSF to a row-major `width × height` patch, starting near `center`.
///
/// `origin` is the image position of sample `(0, 0)`. Both `center` and the
/// reported centroid are image coordinates.
///
/// Never fails: the outcome is reported through [`PsfData::status`].
pub fn fit_psf(
    patch: &[f64],
    width: usize,
    height: usize,
    origin: Point,
    center: Point,
    config: &PsfFitConfig,
) -> PsfData {
    let invalid = || PsfData::failed(config.function, config.circular, PsfFitStatus::Invalid);
    if width < 3 || height < 3 || patch.len() != width * height {
        warn!("PSF fit: patch of {} samples does not match {width}x{height}", patch.len());
        return invalid();
    }
    if patch.iter().any(|v| !v.is_finite()) || !center.is_finite() || !origin.is_finite() {
        return invalid();
    }
    let center = center - origin;
    if center.x < 0.0 || center.y < 0.0 || center.x > (width - 1) as f64 || center.y > (height - 1) as f64 {
        warn!("PSF fit: center ({:.2}, {:.2}) lies outside the patch", center.x, center.y);
        return invalid();
    }

    let problem = Problem {
        patch,
        width,
        height,
        origin,
        function: config.function,
        circular: config.circular,
    };

    match config.function {
        PsfFunction::VariableShape => search_shape(&problem, center, config),
        PsfFunction::Gaussian => problem.fit(center, 2.0, &config.lm),
        PsfFunction::Moffat => problem.fit(center, INITIAL_BETA, &config.lm),
        f => problem.fit(center, f.fixed_beta().unwrap_or(INITIAL_BETA), &config.lm),
    }
}

/// Golden-section search of the VariableShape exponent over a cubic spline
/// through the MADs of [`SHAPE_SAMPLES`] trial fits.
fn search_shape(problem: &Problem<'_>, center: Point, config: &PsfFitConfig) -> PsfData {
    let (lo, hi) = (config.beta_min.min(config.beta_max), config.beta_min.max(config.beta_max));
    if !(lo > 0.0) || !hi.is_finite() {
        return PsfData::failed(problem.function, problem.circular, PsfFitStatus::BadParameters);
    }
    if hi - lo <= GOLDEN_TOLERANCE {
        return problem.fit(center, lo, &config.lm);
    }

    let samples: Vec<f64> = (0..SHAPE_SAMPLES)
        .map(|i| lo + (hi - lo) * i as f64 / (SHAPE_SAMPLES - 1) as f64)
        .collect();
    let fits: Vec<PsfData> = samples
        .par_iter()
        .map(|&k| problem.fit(center, k, &config.lm))
        .collect();

    let (ks, mads): (Vec<f64>, Vec<f64>) = samples
        .iter()
        .zip(&fits)
        .filter(|(_, f)| f.is_valid() && f.mad.is_finite())
        .map(|(&k, f)| (k, f.mad))
        .unzip();
    if ks.is_empty() {
        // Report the failure of the sample closest to the middle of the range.
        return fits[SHAPE_SAMPLES / 2].clone();
    }

    let best = match CubicSpline::new(&ks, &mads) {
        Ok(spline) => golden_section_minimum(|k| spline.evaluate(k), ks[0], ks[ks.len() - 1]),
        Err(_) => ks[0],
    };
    debug!("PSF fit: VariableShape exponent {best:.4} from {} trial fits", ks.len());
    problem.fit(center, best, &config.lm)
}

/// Minimum of a unimodal `f` on `[a, b]`.
fn golden_section_minimum(f: impl Fn(f64) -> f64, mut a: f64, mut b: f64) -> f64 {
    let r = 1.0 / GOLDEN_RATIO;
    let mut c = b - r * (b - a);
    let mut d = a + r * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > GOLDEN_TOLERANCE {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - r * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + r * (b - a);
            fd = f(d);
        }
    }
    0.5 * (a + b)
}

// ── Fit problem ─────────────────────────────────────────────────────────────

struct Problem<'a> {
    patch: &'a [f64],
    width: usize,
    height: usize,
    origin: Point,
    function: PsfFunction,
    circular: bool,
}

/// Per-fit state updated by residual evaluations.
struct Guard {
    /// Whether β is a fitted parameter.
    variable_beta: bool,
    best_cost: Cell<f64>,
    /// β of the lowest-cost evaluation so far.
    best_beta: Cell<f64>,
}

impl Guard {
    /// Whether `params` may be evaluated.
    fn admits(&self, params: &[f64]) -> bool {
        if params[0] < 0.0 || params[1] < 0.0 {
            return false;
        }
        if self.variable_beta {
            let beta = params[params.len() - 1];
            if !(0.0..=MAX_BETA).contains(&beta) {
                return false;
            }
            let best_beta = self.best_beta.get();
            if self.best_cost.get().is_finite() && (beta - best_beta).abs() > MAX_BETA_JUMP * best_beta {
                return false;
            }
        }
        true
    }

    /// Track the β of the lowest-cost evaluation.
    fn record(&self, params: &[f64], cost: f64) {
        if cost < self.best_cost.get() {
            self.best_cost.set(cost);
            if self.variable_beta {
                self.best_beta.set(params[params.len() - 1]);
            }
        }
    }
}

/// One fit as a least-squares problem over the samples of the patch.
struct PsfProblem<'p, 'a> {
    problem: &'p Problem<'a>,
    /// β of fixed-shape fits, starting β of variable Moffat fits.
    beta: f64,
    params: DVector<f64>,
    guard: Guard,
    diff_step: f64,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PsfProblem<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    /// Saturated residuals outside the admissible region make the
    /// minimizer reject the step.
    fn residuals(&self) -> Option<DVector<f64>> {
        let p = self.params.as_slice();
        if !self.guard.admits(p) {
            return Some(DVector::from_element(self.problem.patch.len(), SATURATED_RESIDUAL));
        }
        let r = self.problem.model_residuals(p, self.beta);
        self.guard.record(p, r.norm_squared());
        Some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let p = self.params.as_slice();
        let r0 = self.problem.model_residuals(p, self.beta);
        let mut jacobian = DMatrix::zeros(r0.len(), p.len());
        let mut trial = p.to_vec();
        for k in 0..p.len() {
            trial[k] = p[k] + self.diff_step * p[k].abs().max(self.diff_step);
            let h = trial[k] - p[k];
            let r = self.problem.model_residuals(&trial, self.beta);
            jacobian.set_column(k, &((r - &r0) / h));
            trial[k] = p[k];
        }
        Some(jacobian)
    }
}

/// Model shape decoded from a parameter vector.
#[derive(Debug, Clone, Copy)]
struct Shape {
    b: f64,
    a: f64,
    c0: Point,
    sx: f64,
    sy: f64,
    theta: f64,
    beta: f64,
}

impl<'a> Problem<'a> {
    fn sample(&self, i: usize, j: usize) -> f64 {
        self.patch[j * self.width + i]
    }

    fn variable_beta(&self) -> bool {
        self.function == PsfFunction::Moffat
    }

    fn decode(&self, p: &[f64], fixed_beta: f64) -> Shape {
        let beta = if self.variable_beta() { p[p.len() - 1] } else { fixed_beta };
        let (sx, sy, theta) = if self.circular { (p[4], p[4], 0.0) } else { (p[4], p[5], p[6]) };
        Shape {
            b: p[0],
            a: p[1],
            c0: Point::new(p[2], p[3]),
            sx,
            sy,
            theta,
            beta,
        }
    }

    fn encode(&self, s: &Shape) -> Vec<f64> {
        let mut p = vec![s.b, s.a, s.c0.x, s.c0.y, s.sx];
        if !self.circular {
            p.extend([s.sy, s.theta]);
        }
        if self.variable_beta() {
            p.push(s.beta);
        }
        p
    }

    /// Model minus samples, row-major.
    fn model_residuals(&self, p: &[f64], beta: f64) -> DVector<f64> {
        let shape = self.decode(p, beta);
        let q = QuadraticForm::new(shape.sx, shape.sy, shape.theta);
        DVector::from_iterator(
            self.patch.len(),
            (0..self.patch.len()).map(|k| {
                let d = Point::new((k % self.width) as f64, (k / self.width) as f64) - shape.c0;
                shape.b + shape.a * self.function.profile(q.evaluate(d), shape.beta) - self.patch[k]
            }),
        )
    }

    /// Normalized profile of `shape` at every sample, row-major.
    fn profile(&self, shape: &Shape) -> Vec<f64> {
        let q = QuadraticForm::new(shape.sx, shape.sy, shape.theta);
        let mut g = Vec::with_capacity(self.patch.len());
        for j in 0..self.height {
            for i in 0..self.width {
                let d = Point::new(i as f64, j as f64) - shape.c0;
                g.push(self.function.profile(q.evaluate(d), shape.beta));
            }
        }
        g
    }

    /// Initial parameters from the background level and the region above half
    /// maximum.
    fn initial_shape(&self, center: Point, beta: f64) -> Option<Shape> {
        let b = median(self.patch);
        let peak = self.patch.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let a = peak - b;
        if !(a > 0.0) {
            return None;
        }

        let half = b + 0.5 * a;
        let (mut n, mut sx, mut sy) = (0.0, 0.0, 0.0);
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for j in 0..self.height {
            for i in 0..self.width {
                if self.sample(i, j) >= half {
                    let (x, y) = (i as f64, j as f64);
                    n += 1.0;
                    sx += x;
                    sy += y;
                    sxx += x * x;
                    syy += y * y;
                    sxy += x * y;
                }
            }
        }
        let (mx, my) = (sx / n, sy / n);
        let (vxx, vyy, vxy) = (sxx / n - mx * mx, syy / n - my * my, sxy / n - mx * my);

        // Covariance of a uniform ellipse is a quarter of its squared semi-axes.
        let tr = 0.5 * (vxx + vyy);
        let disc = (0.25 * (vxx - vyy).powi(2) + vxy * vxy).sqrt();
        let half_width = 0.5 * self.function.fwhm_factor(beta);
        let radius = (n / PI).sqrt().max(0.5);
        let (r1, r2) = if n >= 3.0 {
            ((4.0 * (tr + disc)).sqrt().max(0.5), (4.0 * (tr - disc).max(0.0)).sqrt().max(0.5))
        } else {
            (radius, radius)
        };
        let theta = 0.5 * (2.0 * vxy).atan2(vxx - vyy);

        let c0 = if (Point::new(mx, my) - center).norm() <= radius + 1.0 {
            Point::new(mx, my)
        } else {
            center
        };
        let (sx, sy) = if self.circular {
            (radius / half_width, radius / half_width)
        } else {
            (r1 / half_width, r2 / half_width)
        };
        Some(Shape {
            b,
            a,
            c0,
            sx,
            sy,
            theta: if self.circular { 0.0 } else { theta },
            beta,
        })
    }

    /// One LM fit with `beta` fixed, or starting at `beta` for variable Moffat.
    fn fit(&self, center: Point, beta: f64, lm: &LmConfig) -> PsfData {
        let Some(initial) = self.initial_shape(center, beta) else {
            return PsfData::failed(self.function, self.circular, PsfFitStatus::BadParameters);
        };
        let target = PsfProblem {
            problem: self,
            beta,
            params: DVector::from_vec(self.encode(&initial)),
            guard: Guard {
                variable_beta: self.variable_beta(),
                best_cost: Cell::new(f64::INFINITY),
                best_beta: Cell::new(beta),
            },
            diff_step: lm.diff_step,
        };
        let (target, report) = LevenbergMarquardt::new()
            .with_ftol(lm.ftol)
            .with_xtol(lm.xtol)
            .with_gtol(lm.gtol)
            .with_patience(lm.patience.max(1))
            .minimize(target);

        let status = match &report.termination {
            t if t.was_successful() => PsfFitStatus::FittedOk,
            TerminationReason::LostPatience => PsfFitStatus::NoConvergence,
            TerminationReason::Numerical(_) => PsfFitStatus::NoSolution,
            TerminationReason::NoParameters
            | TerminationReason::NoResiduals
            | TerminationReason::WrongDimensions(_) => PsfFitStatus::BadParameters,
            TerminationReason::User(_) => PsfFitStatus::UnknownError,
            _ => PsfFitStatus::InaccurateSolution,
        };
        debug!(
            "PSF fit: {} {:?} after {} evaluations (objective {:.4e})",
            self.function.name(),
            report.termination,
            report.number_of_evaluations,
            report.objective_function
        );

        let params: Vec<f64> = target.params().iter().copied().collect();
        let shape = self.decode(&params, beta);
        if !params.iter().all(|v| v.is_finite()) || shape.sx == 0.0 || shape.sy == 0.0 {
            return PsfData::failed(self.function, self.circular, PsfFitStatus::UnknownError);
        }
        self.report(canonical(shape), status)
    }

    /// Photometry and residual statistics of a fitted shape.
    ///
    /// The support indicator `z` is 1 where the normalized profile reaches
    /// [`SUPPORT_THRESHOLD`]. Flux is `Σ (s − B)·z` over samples above the
    /// background and the mean signal is `flux / Σ z`.
    fn report(&self, shape: Shape, status: PsfFitStatus) -> PsfData {
        let g = self.profile(&shape);
        let (mut flux, mut support, mut residual) = (0.0, 0.0, 0.0);
        for (&s, &gk) in self.patch.iter().zip(&g) {
            let z = if gk >= SUPPORT_THRESHOLD { 1.0 } else { 0.0 };
            support += z;
            if s > shape.b {
                flux += (s - shape.b) * z;
            }
            residual += (shape.b + shape.a * gk - s).abs();
        }
        let mean_signal = if support > 0.0 { flux / support } else { 0.0 };
        let mean_residual = residual / self.patch.len() as f64;
        let mad = if mean_signal > 0.0 { mean_residual / mean_signal } else { f64::INFINITY };

        PsfData {
            function: self.function,
            circular: self.circular,
            status,
            b: shape.b,
            a: shape.a,
            c0: shape.c0 + self.origin,
            sx: shape.sx,
            sy: shape.sy,
            theta: shape.theta.to_degrees(),
            beta: shape.beta,
            flux,
            mean_signal,
            mad,
        }
    }
}

/// Positive widths with `sx` along the major axis and `θ` in `[0, π)`.
///
/// Swapping the axes while rotating by a quarter turn describes the same
/// model, as does a half turn.
fn canonical(mut s: Shape) -> Shape {
    s.sx = s.sx.abs();
    s.sy = s.sy.abs();
    if s.sx < s.sy {
        std::mem::swap(&mut s.sx, &mut s.sy);
        s.theta += 0.5 * PI;
    }
    s.theta = s.theta.rem_euclid(PI);
    if s.sx == s.sy {
        s.theta = 0.0;
    }
    s
}

//! Point spread function models and fitting.
//!
//! A PSF model evaluates, at a sample position `(x, y)`,
//!
//! ```text
//! f(x, y) = B + A·g(u),   u = a·dx² + 2b·dx·dy + c·dy²
//! a = cos²θ/σx² + sin²θ/σy²
//! b = sinθ·cosθ/σy² − sinθ·cosθ/σx²
//! c = sin²θ/σx² + cos²θ/σy²
//! ```
//!
//! with `dx = x − x0`, `dy = y − y0` and a radial profile `g`:
//!
//! | Function        | g(u)                 |
//! |-----------------|----------------------|
//! | Gaussian        | `exp(−u/2)`          |
//! | Moffat (β)      | `(1 + u)^−β`         |
//! | Lorentzian      | `(1 + u)^−1`         |
//! | VariableShape k | `exp(−u^(k/2) / k)`  |
//!
//! Circular models have `σx = σy` and no rotation.

mod fit;

pub use fit::{fit_psf, LmConfig, PsfFitConfig};

use crate::error::{Error, Result};
use crate::geometry::Point;

/// PSF model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PsfFunction {
    Gaussian,
    /// Moffat with a fitted β.
    Moffat,
    MoffatA,
    Moffat8,
    Moffat6,
    Moffat4,
    Moffat25,
    Moffat15,
    /// Moffat with β = 1.
    Lorentzian,
    /// Generalized Gaussian with shape exponent `k`, searched over the
    /// configured β range.
    VariableShape,
}

impl PsfFunction {
    /// Fixed β of the Moffat variants.
    pub fn fixed_beta(self) -> Option<f64> {
        match self {
            Self::MoffatA => Some(10.0),
            Self::Moffat8 => Some(8.0),
            Self::Moffat6 => Some(6.0),
            Self::Moffat4 => Some(4.0),
            Self::Moffat25 => Some(2.5),
            Self::Moffat15 => Some(1.5),
            Self::Lorentzian => Some(1.0),
            _ => None,
        }
    }

    pub fn is_moffat(self) -> bool {
        self == Self::Moffat || self.fixed_beta().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gaussian => "Gaussian",
            Self::Moffat => "Moffat",
            Self::MoffatA => "Moffat10",
            Self::Moffat8 => "Moffat8",
            Self::Moffat6 => "Moffat6",
            Self::Moffat4 => "Moffat4",
            Self::Moffat25 => "Moffat2.5",
            Self::Moffat15 => "Moffat1.5",
            Self::Lorentzian => "Lorentzian",
            Self::VariableShape => "VariableShape",
        }
    }

    /// Radial profile `g(u)` with shape parameter `beta`.
    pub fn profile(self, u: f64, beta: f64) -> f64 {
        match self {
            Self::Gaussian => (-0.5 * u).exp(),
            Self::VariableShape => (-u.max(0.0).powf(0.5 * beta) / beta).exp(),
            _ => (1.0 + u).powf(-beta),
        }
    }

    /// Full width at half maximum in units of σ.
    pub fn fwhm_factor(self, beta: f64) -> f64 {
        match self {
            Self::Gaussian => 2.0 * (2.0 * std::f64::consts::LN_2).sqrt(),
            Self::VariableShape => 2.0 * (beta * std::f64::consts::LN_2).powf(1.0 / beta),
            _ => 2.0 * (2f64.powf(1.0 / beta) - 1.0).sqrt(),
        }
    }
}

/// Outcome of a PSF fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PsfFitStatus {
    #[default]
    NotFitted,
    FittedOk,
    NoSolution,
    NoConvergence,
    InaccurateSolution,
    BadParameters,
    UnknownError,
    Invalid,
}

/// Parameters and statistics of a fitted PSF.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfData {
    pub function: PsfFunction,
    pub circular: bool,
    pub status: PsfFitStatus,
    /// Local background.
    pub b: f64,
    /// Amplitude above the background.
    pub a: f64,
    /// Centroid in image coordinates.
    pub c0: Point,
    pub sx: f64,
    pub sy: f64,
    /// Rotation of the `sx` axis, degrees in `[0, 180)`.
    pub theta: f64,
    /// Moffat β or VariableShape exponent; 2 for Gaussians.
    pub beta: f64,
    /// Background-subtracted signal within the PSF support.
    pub flux: f64,
    /// `flux` per support sample.
    pub mean_signal: f64,
    /// Mean absolute residual normalized by `mean_signal`.
    pub mad: f64,
}

impl PsfData {
    pub(crate) fn failed(function: PsfFunction, circular: bool, status: PsfFitStatus) -> Self {
        Self {
            function,
            circular,
            status,
            b: 0.0,
            a: 0.0,
            c0: Point::default(),
            sx: 0.0,
            sy: 0.0,
            theta: 0.0,
            beta: 0.0,
            flux: 0.0,
            mean_signal: 0.0,
            mad: 0.0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == PsfFitStatus::FittedOk
    }

    /// The fit, or [`Error::PsfFitFailed`] unless it succeeded.
    pub fn ok(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(Error::PsfFitFailed(self.status))
        }
    }

    pub fn fwhm_x(&self) -> f64 {
        self.function.fwhm_factor(self.beta) * self.sx
    }

    pub fn fwhm_y(&self) -> f64 {
        self.function.fwhm_factor(self.beta) * self.sy
    }

    /// Model value at `p`.
    pub fn evaluate(&self, p: Point) -> f64 {
        let q = QuadraticForm::new(self.sx, self.sy, self.theta.to_radians());
        self.b + self.a * self.function.profile(q.evaluate(p - self.c0), self.beta)
    }
}

/// Coefficients of the elliptical quadratic form `u(dx, dy)`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuadraticForm {
    a: f64,
    b: f64,
    c: f64,
}

impl QuadraticForm {
    pub(crate) fn new(sx: f64, sy: f64, theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        let (ix, iy) = (1.0 / (sx * sx), 1.0 / (sy * sy));
        Self {
            a: c * c * ix + s * s * iy,
            b: s * c * (iy - ix),
            c: s * s * ix + c * c * iy,
        }
    }

    pub(crate) fn evaluate(&self, d: Point) -> f64 {
        self.a * d.x * d.x + 2.0 * self.b * d.x * d.y + self.c * d.y * d.y
    }
}

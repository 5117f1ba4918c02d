//! Numerical kernels: symmetric indefinite solver, robust order statistics,
//! one-dimensional cubic splines and special functions.

pub mod cubic_spline;
pub mod median;
pub mod special;
pub mod symmetric;

pub use cubic_spline::CubicSpline;
pub use median::{mad, median, order_statistic, two_sided_mad, Sample};
pub use special::ln_gamma;
pub use symmetric::{BunchKaufman, PackedSymmetricMatrix};

//! Thin-plate surface splines and their compositions.
//!
//! - [`ThinPlateSpline`]: scalar surface `z = S(x, y)` over scattered nodes.
//! - [`PointSurfaceSpline`]: point-to-point map built from two scalar splines.
//! - [`RecursivePointSurfaceSpline`]: quadtree partition of point splines for
//!   large node sets.
//! - [`SurfaceSimplifier`]: control-point reduction ahead of spline generation.

pub mod point;
pub mod recursive;
pub mod simplifier;
pub mod thin_plate;

pub use point::PointSurfaceSpline;
pub use recursive::{RecursivePointSurfaceSpline, RecursiveSplineConfig};
pub use simplifier::{SimplifiedPoints, SurfaceSimplifier, SurfaceSimplifierConfig};
pub use thin_plate::{SurfaceSplineConfig, ThinPlateSpline};

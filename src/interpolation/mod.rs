//! Surface interpolation over regular grids and scattered nodes.

pub mod grid;
pub mod shepard;

pub use grid::{GridInterpolation, PointGridInterpolation};
pub use shepard::{PointShepardInterpolation, ShepardConfig, ShepardInterpolation};

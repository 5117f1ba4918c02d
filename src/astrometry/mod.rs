//! Astrometric solutions: projections, world transformations and the
//! metadata tying them to an image.

pub mod metadata;
pub mod projection;
pub mod spline_transformation;
pub mod wcs;
pub mod world_transformation;

pub use metadata::{angular_distance, rotation_of, AstrometricMetadata, Description, CONTROL_POINTS_PROPERTY};
pub use projection::{create_projection, Projection, ZenithalKind, ZenithalProjection};
pub use spline_transformation::{
    SplineControlPoints, SplineWorldTransformation, SplineWorldTransformationConfig,
};
pub use wcs::WcsKeywords;
pub use world_transformation::{LinearWorldTransformation, WorldTransformation};

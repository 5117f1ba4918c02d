//! Transformations between image coordinates and native plane coordinates.

use crate::error::Result;
use crate::geometry::Point;
use crate::linear_transformation::LinearTransformation;

use super::spline_transformation::SplineWorldTransformation;

/// Affine world transformation with its cached inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearWorldTransformation {
    image_to_world: LinearTransformation,
    world_to_image: LinearTransformation,
}

impl LinearWorldTransformation {
    /// Build from the image to native map. Fails on a singular matrix.
    pub fn new(image_to_world: LinearTransformation) -> Result<Self> {
        Ok(Self {
            world_to_image: image_to_world.inverse()?,
            image_to_world,
        })
    }

    pub fn image_to_world(&self) -> &LinearTransformation {
        &self.image_to_world
    }

    pub fn world_to_image(&self) -> &LinearTransformation {
        &self.world_to_image
    }
}

/// A world transformation is either linear or a pair of surface splines.
#[derive(Debug, Clone)]
pub enum WorldTransformation {
    Linear(LinearWorldTransformation),
    Spline(Box<SplineWorldTransformation>),
}

impl WorldTransformation {
    /// Native plane to image coordinates.
    pub fn direct(&self, native: Point) -> Point {
        match self {
            Self::Linear(t) => t.world_to_image.transform(native),
            Self::Spline(t) => t.direct(native),
        }
    }

    /// Image to native plane coordinates.
    pub fn inverse(&self, image: Point) -> Point {
        match self {
            Self::Linear(t) => t.image_to_world.transform(image),
            Self::Spline(t) => t.inverse(image),
        }
    }

    /// Affine image to native map, exact for linear transformations.
    pub fn approximate_linear_transform(&self) -> LinearTransformation {
        match self {
            Self::Linear(t) => t.image_to_world,
            Self::Spline(t) => *t.approximate_linear_transform(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Linear(t) => t.image_to_world.is_singular(),
            Self::Spline(t) => t.control_point_count() == 0,
        }
    }

    pub fn is_spline(&self) -> bool {
        matches!(self, Self::Spline(_))
    }

    pub fn as_spline(&self) -> Option<&SplineWorldTransformation> {
        match self {
            Self::Spline(t) => Some(t.as_ref()),
            Self::Linear(_) => None,
        }
    }

    pub fn as_spline_mut(&mut self) -> Option<&mut SplineWorldTransformation> {
        match self {
            Self::Spline(t) => Some(t.as_mut()),
            Self::Linear(_) => None,
        }
    }

    /// Serialized spline control points, or `None` for a linear transformation.
    pub fn serialized_control_points(&self) -> Option<Result<Vec<u8>>> {
        self.as_spline().map(SplineWorldTransformation::serialize_control_points)
    }
}

impl From<LinearWorldTransformation> for WorldTransformation {
    fn from(t: LinearWorldTransformation) -> Self {
        Self::Linear(t)
    }
}

impl From<SplineWorldTransformation> for WorldTransformation {
    fn from(t: SplineWorldTransformation) -> Self {
        Self::Spline(Box::new(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_direct_inverts_inverse() {
        let a = LinearTransformation::new(-2.8e-4, 1e-6, 0.143, 2e-6, -2.8e-4, 0.142);
        let t = WorldTransformation::from(LinearWorldTransformation::new(a).unwrap());
        let p = Point::new(100.25, 900.75);
        assert!((t.direct(t.inverse(p)) - p).norm() < 1e-9);
        assert_eq!(t.approximate_linear_transform(), a);
        assert!(!t.is_empty());
        assert!(!t.is_spline());
        assert!(t.serialized_control_points().is_none());
    }

    #[test]
    fn singular_linear_fails() {
        let a = LinearTransformation::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(LinearWorldTransformation::new(a).is_err());
    }
}

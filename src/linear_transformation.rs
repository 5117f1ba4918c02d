//! Two-dimensional affine transformations.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::geometry::Point;

/// Affine map `x' = a00·x + a01·y + a02`, `y' = a10·x + a11·y + a12`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTransformation {
    pub a00: f64,
    pub a01: f64,
    pub a02: f64,
    pub a10: f64,
    pub a11: f64,
    pub a12: f64,
}

impl Default for LinearTransformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl LinearTransformation {
    pub fn new(a00: f64, a01: f64, a02: f64, a10: f64, a11: f64, a12: f64) -> Self {
        Self {
            a00,
            a01,
            a02,
            a10,
            a11,
            a12,
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn transform(&self, p: Point) -> Point {
        Point::new(
            self.a00 * p.x + self.a01 * p.y + self.a02,
            self.a10 * p.x + self.a11 * p.y + self.a12,
        )
    }

    /// Apply the linear part only, ignoring the translation.
    pub fn transform_vector(&self, d: Point) -> Point {
        Point::new(self.a00 * d.x + self.a01 * d.y, self.a10 * d.x + self.a11 * d.y)
    }

    pub fn determinant(&self) -> f64 {
        self.a00 * self.a11 - self.a01 * self.a10
    }

    pub fn is_singular(&self) -> bool {
        let scale = self.a00.abs().max(self.a01.abs()).max(self.a10.abs()).max(self.a11.abs());
        !(self.determinant().abs() > f64::EPSILON * scale * scale)
    }

    pub fn inverse(&self) -> Result<Self> {
        if self.is_singular() {
            return Err(Error::IncompatibleInputs(format!(
                "singular linear transformation (determinant {:e})",
                self.determinant()
            )));
        }
        let det = self.determinant();
        let b00 = self.a11 / det;
        let b01 = -self.a01 / det;
        let b10 = -self.a10 / det;
        let b11 = self.a00 / det;
        Ok(Self::new(
            b00,
            b01,
            -(b00 * self.a02 + b01 * self.a12),
            b10,
            b11,
            -(b10 * self.a02 + b11 * self.a12),
        ))
    }

    /// Composition applying `first`, then `self`.
    pub fn multiply(&self, first: &LinearTransformation) -> Self {
        Self::new(
            self.a00 * first.a00 + self.a01 * first.a10,
            self.a00 * first.a01 + self.a01 * first.a11,
            self.a00 * first.a02 + self.a01 * first.a12 + self.a02,
            self.a10 * first.a00 + self.a11 * first.a10,
            self.a10 * first.a01 + self.a11 * first.a11,
            self.a10 * first.a02 + self.a11 * first.a12 + self.a12,
        )
    }

    /// Mean Euclidean norm of the two rows of the linear part.
    pub fn mean_row_norm(&self) -> f64 {
        (self.a00.hypot(self.a01) + self.a10.hypot(self.a11)) / 2.0
    }

    /// Least-squares affine fit mapping `from[i]` to `to[i]`.
    pub fn fit(from: &[Point], to: &[Point]) -> Result<Self> {
        if from.len() != to.len() {
            return Err(Error::IncompatibleInputs(format!(
                "{} source points paired with {} target points",
                from.len(),
                to.len()
            )));
        }
        if from.len() < 3 {
            return Err(Error::InsufficientNodes {
                found: from.len(),
                required: 3,
            });
        }

        // Centre the sources to keep the design matrix well conditioned.
        let n = from.len() as f64;
        let c = from.iter().fold(Point::default(), |acc, &p| acc + p) / n;
        let mut a = DMatrix::<f64>::zeros(from.len(), 3);
        let mut bx = DVector::<f64>::zeros(from.len());
        let mut by = DVector::<f64>::zeros(from.len());
        for (i, (p, q)) in from.iter().zip(to).enumerate() {
            a[(i, 0)] = p.x - c.x;
            a[(i, 1)] = p.y - c.y;
            a[(i, 2)] = 1.0;
            bx[i] = q.x;
            by[i] = q.y;
        }
        let svd = a.svd(true, true);
        let rank = svd.rank(1e-12 * svd.singular_values.max());
        if rank < 3 {
            return Err(Error::IncompatibleInputs(
                "collinear control points admit no affine fit".into(),
            ));
        }
        let sx = svd
            .solve(&bx, 1e-12)
            .map_err(|e| Error::IncompatibleInputs(e.to_string()))?;
        let sy = svd
            .solve(&by, 1e-12)
            .map_err(|e| Error::IncompatibleInputs(e.to_string()))?;

        let centred = Self::new(sx[0], sx[1], sx[2], sy[0], sy[1], sy[2]);
        Ok(centred.multiply(&Self::new(1.0, 0.0, -c.x, 0.0, 1.0, -c.y)))
    }
}

/// Two rows of three coefficients.
impl fmt::Display for LinearTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:+.8e} {:+.8e} {:+.8e}", self.a00, self.a01, self.a02)?;
        write!(f, "{:+.8e} {:+.8e} {:+.8e}", self.a10, self.a11, self.a12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LinearTransformation {
        LinearTransformation::new(0.5, -1.2, 30.0, 0.7, 0.9, -4.0)
    }

    #[test]
    fn inverse_round_trip() {
        let t = sample();
        let inv = t.inverse().unwrap();
        let p = Point::new(123.0, -45.5);
        let q = inv.transform(t.transform(p));
        assert!((q - p).norm() < 1e-12);
        let id = inv.multiply(&t);
        assert!((id.a00 - 1.0).abs() < 1e-12 && id.a01.abs() < 1e-12 && id.a02.abs() < 1e-12);
    }

    #[test]
    fn composition_order() {
        let a = sample();
        let b = LinearTransformation::new(2.0, 0.0, 1.0, 0.0, 3.0, -1.0);
        let p = Point::new(1.5, 2.5);
        assert!((a.multiply(&b).transform(p) - a.transform(b.transform(p))).norm() < 1e-12);
        let d = Point::new(3.0, -2.0);
        assert!((a.transform_vector(d) - (a.transform(p + d) - a.transform(p))).norm() < 1e-12);
    }

    #[test]
    fn singular_inverse_fails() {
        let t = LinearTransformation::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(t.is_singular());
        assert!(matches!(t.inverse(), Err(Error::IncompatibleInputs(_))));
    }

    #[test]
    fn least_squares_recovers_affine() {
        let t = sample();
        let from: Vec<Point> = (0..50)
            .map(|i| Point::new((i % 7) as f64 * 13.0 + 1000.0, (i / 7) as f64 * 9.0 + 2000.0))
            .collect();
        let to: Vec<Point> = from.iter().map(|&p| t.transform(p)).collect();
        let fit = LinearTransformation::fit(&from, &to).unwrap();
        for (a, b) in [(fit.a00, t.a00), (fit.a01, t.a01), (fit.a02, t.a02), (fit.a10, t.a10), (fit.a11, t.a11), (fit.a12, t.a12)] {
            assert!((a - b).abs() < 1e-8, "{a} != {b}");
        }
        assert!((t.mean_row_norm() - (1.3 + 0.7f64.hypot(0.9)) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn collinear_fit_fails() {
        let from: Vec<Point> = (0..10).map(|i| Point::new(i as f64, 2.0 * i as f64)).collect();
        assert!(LinearTransformation::fit(&from, &from).is_err());
    }
}

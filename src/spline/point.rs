//! Point-to-point surface splines.

use crate::error::{Error, Result};
use crate::geometry::Point;

use super::thin_plate::{SurfaceSplineConfig, ThinPlateSpline};

/// Two thin-plate splines sharing node positions, one per output component.
#[derive(Debug, Clone)]
pub struct PointSurfaceSpline {
    sx: ThinPlateSpline,
    sy: ThinPlateSpline,
    /// Node sets kept for [`inverse`](Self::inverse); empty when the spline
    /// was assembled from independently generated components.
    p1: Vec<Point>,
    p2: Vec<Point>,
    weights: Option<Vec<f64>>,
}

impl PointSurfaceSpline {
    /// Generate a spline mapping each `p1[i]` to `p2[i]`.
    pub fn fit(
        p1: &[Point],
        p2: &[Point],
        weights: Option<&[f64]>,
        config: &SurfaceSplineConfig,
    ) -> Result<Self> {
        if p1.len() != p2.len() {
            return Err(Error::IncompatibleInputs(format!(
                "{} source points paired with {} target points",
                p1.len(),
                p2.len()
            )));
        }
        let x: Vec<f64> = p1.iter().map(|p| p.x).collect();
        let y: Vec<f64> = p1.iter().map(|p| p.y).collect();
        let zx: Vec<f64> = p2.iter().map(|p| p.x).collect();
        let zy: Vec<f64> = p2.iter().map(|p| p.y).collect();
        let sx = ThinPlateSpline::fit(&x, &y, &zx, weights, config)?;
        let sy = ThinPlateSpline::fit(&x, &y, &zy, weights, config)?;
        Ok(Self {
            sx,
            sy,
            p1: p1.to_vec(),
            p2: p2.to_vec(),
            weights: weights.map(<[f64]>::to_vec),
        })
    }

    /// Assemble a point spline from two separately generated components.
    /// Such a spline cannot be inverted.
    pub fn from_components(sx: ThinPlateSpline, sy: ThinPlateSpline) -> Self {
        Self {
            sx,
            sy,
            p1: Vec::new(),
            p2: Vec::new(),
            weights: None,
        }
    }

    pub fn evaluate(&self, p: Point) -> Point {
        Point::new(self.sx.evaluate(p.x, p.y), self.sy.evaluate(p.x, p.y))
    }

    pub fn x_spline(&self) -> &ThinPlateSpline {
        &self.sx
    }

    pub fn y_spline(&self) -> &ThinPlateSpline {
        &self.sy
    }

    /// Number of distinct nodes of the X component.
    pub fn node_count(&self) -> usize {
        self.sx.node_count()
    }

    /// A spline mapping the forward targets back to the forward sources.
    /// Exact only at the nodes of an interpolating spline.
    pub fn inverse(&self) -> Result<Self> {
        if self.p1.is_empty() {
            return Err(Error::NotInitialized("point surface spline node set"));
        }
        Self::fit(&self.p2, &self.p1, self.weights.as_deref(), self.sx.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> (Vec<Point>, Vec<Point>) {
        let mut p1 = Vec::new();
        let mut p2 = Vec::new();
        for i in 0..12 {
            for j in 0..12 {
                let p = Point::new(i as f64 * 40.0, j as f64 * 35.0);
                let q = Point::new(
                    0.9 * p.x - 0.1 * p.y + 12.0 + 1e-4 * p.x * p.y,
                    0.2 * p.x + 1.1 * p.y - 7.0 + 2e-4 * p.x * p.x,
                );
                p1.push(p);
                p2.push(q);
            }
        }
        (p1, p2)
    }

    #[test]
    fn maps_nodes_and_inverts() {
        let (p1, p2) = grid();
        let s = PointSurfaceSpline::fit(&p1, &p2, None, &SurfaceSplineConfig::default()).unwrap();
        for (a, b) in p1.iter().zip(&p2) {
            let q = s.evaluate(*a);
            assert!((q - *b).norm() < 1e-7, "{q:?} != {b:?}");
        }
        let inv = s.inverse().unwrap();
        let probe = Point::new(210.0, 170.0);
        let back = inv.evaluate(s.evaluate(probe));
        assert!((back - probe).norm() < 0.05, "round trip error {:?}", back - probe);
    }

    #[test]
    fn mismatched_lengths_fail() {
        let (p1, p2) = grid();
        assert!(matches!(
            PointSurfaceSpline::fit(&p1, &p2[1..], None, &SurfaceSplineConfig::default()),
            Err(Error::IncompatibleInputs(_))
        ));
    }
}

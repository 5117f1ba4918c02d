//! Thin-plate surface splines of arbitrary derivative order.
//!
//! A spline of order `m` over nodes `(x_i, y_i, z_i)` is
//!
//! ```text
//! S(x, y) = Σ c_i · E_m(r_i²) + Σ a_k · monomial_k(x, y)
//! ```
//!
//! where `E_m(r²) = r^(2(m-1)) · ln(r²)` and the polynomial part has total
//! degree `m - 1`. Node coordinates are reduced to the unit disk about their
//! centroid before the system is assembled, which keeps the kernel values of
//! order one regardless of the coordinate units.

use tracing::debug;

use crate::error::{Error, Result};
use crate::numeric::symmetric::{BunchKaufman, PackedSymmetricMatrix};

/// Generation parameters for a surface spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSplineConfig {
    /// Derivative order, `m >= 2`. Default 2 (classic thin-plate spline).
    pub order: usize,
    /// Smoothing factor. Zero interpolates the nodes; larger values trade
    /// fidelity for smoothness. Default 0.
    pub smoothness: f64,
}

impl Default for SurfaceSplineConfig {
    fn default() -> Self {
        Self {
            order: 2,
            smoothness: 0.0,
        }
    }
}

impl SurfaceSplineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.order < 2 {
            return Err(Error::OutOfRange {
                what: "surface spline order",
                value: self.order as f64,
            });
        }
        if !(self.smoothness >= 0.0) {
            return Err(Error::OutOfRange {
                what: "surface spline smoothness",
                value: self.smoothness,
            });
        }
        Ok(())
    }

    /// Number of polynomial terms, `m(m+1)/2`.
    pub fn polynomial_terms(&self) -> usize {
        self.order * (self.order + 1) / 2
    }
}

/// Iterator over monomial exponents `(i, j)` of `x^i·y^j` in generation order:
/// `1, x, y, x², xy, y², x³, ...`.
#[derive(Debug, Clone)]
struct Monomials {
    next: (u32, u32),
    remaining: usize,
}

impl Monomials {
    fn new(count: usize) -> Self {
        Self {
            next: (0, 0),
            remaining: count,
        }
    }
}

impl Iterator for Monomials {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        let (i, j) = current;
        self.next = if i == 0 { (j + 1, 0) } else { (i - 1, j + 1) };
        Some(current)
    }
}

#[inline]
fn kernel(r2: f64, order: usize) -> f64 {
    if r2 > 0.0 {
        r2.powi(order as i32 - 1) * r2.ln()
    } else {
        0.0
    }
}

/// A generated thin-plate spline. Instances only exist in a valid state:
/// [`ThinPlateSpline::fit`] either produces a usable spline or an error.
#[derive(Debug, Clone)]
pub struct ThinPlateSpline {
    config: SurfaceSplineConfig,
    /// Normalized node abscissae.
    x: Vec<f64>,
    /// Normalized node ordinates.
    y: Vec<f64>,
    x0: f64,
    y0: f64,
    /// Reciprocal of the normalization radius.
    scale: f64,
    /// Kernel coefficients followed by polynomial coefficients.
    coefficients: Vec<f64>,
}

impl ThinPlateSpline {
    /// Generate a spline through (or near, when smoothing) the nodes
    /// `(x[i], y[i], z[i])`.
    ///
    /// `weights`, when given, must have one entry per node; entries `<= 0`
    /// disable weighting for that node. Weights only act when the smoothness
    /// is positive.
    pub fn fit(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        weights: Option<&[f64]>,
        config: &SurfaceSplineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if x.len() != y.len() || x.len() != z.len() {
            return Err(Error::IncompatibleInputs(format!(
                "surface spline node arrays differ in length ({}, {}, {})",
                x.len(),
                y.len(),
                z.len()
            )));
        }
        if let Some(w) = weights {
            if w.len() != x.len() {
                return Err(Error::IncompatibleInputs(format!(
                    "{} weights supplied for {} nodes",
                    w.len(),
                    x.len()
                )));
            }
        }
        if x.len() < 3 {
            return Err(Error::InsufficientNodes {
                found: x.len(),
                required: 3,
            });
        }

        // Reduce node coordinates to the unit disk.
        let n_in = x.len() as f64;
        let x0 = x.iter().sum::<f64>() / n_in;
        let y0 = y.iter().sum::<f64>() / n_in;
        let r0 = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| (xi - x0).hypot(yi - y0))
            .fold(0.0, f64::max);
        if !(r0 > 0.0) || !r0.is_finite() {
            return Err(Error::InsufficientNodes {
                found: 1,
                required: 3,
            });
        }
        let scale = 1.0 / r0;

        struct Node {
            x: f64,
            y: f64,
            z: f64,
            w: f64,
        }
        let mut nodes: Vec<Node> = (0..x.len())
            .map(|i| Node {
                x: (x[i] - x0) * scale,
                y: (y[i] - y0) * scale,
                z: z[i],
                w: weights.map_or(1.0, |w| if w[i] > 0.0 { w[i] } else { 1.0 }),
            })
            .collect();

        // Remove duplicate nodes, keeping the first occurrence.
        nodes.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        let mut unique: Vec<Node> = Vec::with_capacity(nodes.len());
        for node in nodes {
            let duplicate = unique.iter().rev().take_while(|u| node.x - u.x < f64::EPSILON).any(
                |u| (node.x - u.x).abs() < f64::EPSILON && (node.y - u.y).abs() < f64::EPSILON,
            );
            if !duplicate {
                unique.push(node);
            }
        }
        let n = unique.len();
        if n < 3 {
            return Err(Error::InsufficientNodes {
                found: n,
                required: 3,
            });
        }

        let order = config.order;
        let terms = config.polynomial_terms();
        let size = n + terms;
        debug!("Surface spline: order {order}, {n} nodes, system of order {size}");

        let mut matrix = PackedSymmetricMatrix::zeros(size);
        for i in 0..n {
            let diagonal = if config.smoothness > 0.0 {
                config.smoothness / unique[i].w
            } else {
                0.0
            };
            matrix.set(i, i, diagonal);
            for k in i + 1..n {
                let dx = unique[i].x - unique[k].x;
                let dy = unique[i].y - unique[k].y;
                matrix.set(i, k, kernel(dx * dx + dy * dy, order));
            }
            for (t, (pi, pj)) in Monomials::new(terms).enumerate() {
                let value = unique[i].x.powi(pi as i32) * unique[i].y.powi(pj as i32);
                matrix.set(i, n + t, value);
            }
        }

        let factorization = BunchKaufman::factorize(matrix);
        factorization.ensure_nonsingular()?;

        let mut coefficients: Vec<f64> = unique.iter().map(|node| node.z).collect();
        coefficients.resize(size, 0.0);
        factorization.solve(&mut coefficients)?;

        Ok(Self {
            config: *config,
            x: unique.iter().map(|node| node.x).collect(),
            y: unique.iter().map(|node| node.y).collect(),
            x0,
            y0,
            scale,
            coefficients,
        })
    }

    pub fn config(&self) -> &SurfaceSplineConfig {
        &self.config
    }

    /// Number of distinct nodes after de-duplication.
    pub fn node_count(&self) -> usize {
        self.x.len()
    }

    /// Solved coefficients: one per node, then one per polynomial term.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Evaluate the spline at `(x, y)` in the original coordinate units.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let u = (x - self.x0) * self.scale;
        let v = (y - self.y0) * self.scale;
        let n = self.x.len();
        let order = self.config.order;

        let polynomial: f64 = Monomials::new(self.config.polynomial_terms())
            .zip(&self.coefficients[n..])
            .map(|((i, j), &a)| a * u.powi(i as i32) * v.powi(j as i32))
            .sum();

        let radial: f64 = self
            .x
            .iter()
            .zip(&self.y)
            .zip(&self.coefficients[..n])
            .map(|((&xi, &yi), &c)| {
                let dx = u - xi;
                let dy = v - yi;
                c * kernel(dx * dx + dy * dy, order)
            })
            .sum();

        polynomial + radial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn surface(x: f64, y: f64) -> f64 {
        100.0 + 3.0 * x - 2.0 * y + 0.01 * x * y + 20.0 * (x / 50.0).sin() * (y / 70.0).cos()
    }

    fn random_nodes(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.random_range(0.0..500.0)).collect();
        let y: Vec<f64> = (0..n).map(|_| rng.random_range(0.0..300.0)).collect();
        let z = x.iter().zip(&y).map(|(&a, &b)| surface(a, b)).collect();
        (x, y, z)
    }

    #[test]
    fn monomial_order() {
        let m: Vec<_> = Monomials::new(10).collect();
        assert_eq!(
            m,
            vec![(0, 0), (1, 0), (0, 1), (2, 0), (1, 1), (0, 2), (3, 0), (2, 1), (1, 2), (0, 3)]
        );
    }

    #[test]
    fn interpolates_nodes_exactly() {
        let (x, y, z) = random_nodes(120, 1);
        let s = ThinPlateSpline::fit(&x, &y, &z, None, &SurfaceSplineConfig::default()).unwrap();
        let zmax = z.iter().fold(0.0f64, |a, &b| a.max(b.abs()));
        for i in 0..x.len() {
            let err = (s.evaluate(x[i], y[i]) - z[i]).abs();
            assert!(err <= 1e-10 * zmax, "node {i} error {err}");
        }
    }

    #[test]
    fn reproduces_plane_everywhere() {
        let x = [0.0, 10.0, 0.0, 10.0, 5.0];
        let y = [0.0, 0.0, 10.0, 10.0, 4.0];
        let z: Vec<f64> = x.iter().zip(&y).map(|(a, b)| 2.0 * a - 3.0 * b + 1.0).collect();
        let s = ThinPlateSpline::fit(&x, &y, &z, None, &SurfaceSplineConfig::default()).unwrap();
        for (px, py) in [(2.5, 7.5), (-4.0, 3.0), (12.0, 14.0)] {
            let expected = 2.0 * px - 3.0 * py + 1.0;
            assert!((s.evaluate(px, py) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn node_order_does_not_matter() {
        let (x, y, z) = random_nodes(80, 2);
        let config = SurfaceSplineConfig::default();
        let a = ThinPlateSpline::fit(&x, &y, &z, None, &config).unwrap();
        let mut idx: Vec<usize> = (0..x.len()).collect();
        idx.reverse();
        idx.swap(3, 40);
        let px: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
        let py: Vec<f64> = idx.iter().map(|&i| y[i]).collect();
        let pz: Vec<f64> = idx.iter().map(|&i| z[i]).collect();
        let b = ThinPlateSpline::fit(&px, &py, &pz, None, &config).unwrap();
        let zmax = z.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
        for (qx, qy) in [(10.0, 10.0), (250.0, 150.0), (499.0, 1.0), (123.4, 287.6)] {
            let d = (a.evaluate(qx, qy) - b.evaluate(qx, qy)).abs();
            assert!(d <= 1e-9 * zmax, "symmetry violated by {d}");
        }
    }

    #[test]
    fn smoothing_pulls_weighted_nodes_closer() {
        let (x, y, mut z) = random_nodes(60, 3);
        z[10] += 50.0;
        let config = SurfaceSplineConfig {
            order: 2,
            smoothness: 0.05,
        };
        let plain = ThinPlateSpline::fit(&x, &y, &z, None, &config).unwrap();
        let mut w = vec![1.0; x.len()];
        w[10] = 100.0;
        let weighted = ThinPlateSpline::fit(&x, &y, &z, Some(&w), &config).unwrap();
        let e_plain = (plain.evaluate(x[10], y[10]) - z[10]).abs();
        let e_weighted = (weighted.evaluate(x[10], y[10]) - z[10]).abs();
        assert!(e_plain > 1e-6, "smoothing should not interpolate");
        assert!(e_weighted < e_plain);
    }

    #[test]
    fn duplicates_are_removed() {
        let x = [0.0, 1.0, 0.0, 1.0, 1.0];
        let y = [0.0, 0.0, 1.0, 1.0, 1.0];
        let z = [0.0, 1.0, 1.0, 2.0, 2.0];
        let s = ThinPlateSpline::fit(&x, &y, &z, None, &SurfaceSplineConfig::default()).unwrap();
        assert_eq!(s.node_count(), 4);
        assert_eq!(s.coefficients().len(), 4 + 3);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let cfg = SurfaceSplineConfig::default();
        assert!(matches!(
            ThinPlateSpline::fit(&[0.0, 1.0], &[0.0, 1.0], &[0.0, 1.0], None, &cfg),
            Err(Error::InsufficientNodes { found: 2, .. })
        ));
        assert!(matches!(
            ThinPlateSpline::fit(&[1.0, 1.0, 1.0], &[2.0, 2.0, 2.0], &[0.0, 1.0, 2.0], None, &cfg),
            Err(Error::InsufficientNodes { .. })
        ));
        assert!(matches!(
            ThinPlateSpline::fit(&[0.0, 1.0, 2.0], &[0.0, 1.0], &[0.0, 1.0, 2.0], None, &cfg),
            Err(Error::IncompatibleInputs(_))
        ));
    }
}

//! Natural cubic interpolating spline in one dimension.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the nodes.
    d2: Vec<f64>,
}

impl CubicSpline {
    /// Interpolate `(x[i], y[i])` with strictly increasing abscissae.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::IncompatibleInputs(format!(
                "cubic spline: {} abscissae for {} ordinates",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(Error::InsufficientNodes {
                found: x.len(),
                required: 2,
            });
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::IncompatibleInputs(
                "cubic spline abscissae must be strictly increasing".into(),
            ));
        }

        let n = x.len();
        let mut d2 = vec![0.0; n];
        if n > 2 {
            // Tridiagonal system for the interior second derivatives.
            let m = n - 2;
            let mut diag = vec![0.0; m];
            let mut upper = vec![0.0; m];
            let mut rhs = vec![0.0; m];
            for i in 0..m {
                let h0 = x[i + 1] - x[i];
                let h1 = x[i + 2] - x[i + 1];
                diag[i] = 2.0 * (h0 + h1);
                upper[i] = h1;
                rhs[i] = 6.0 * ((y[i + 2] - y[i + 1]) / h1 - (y[i + 1] - y[i]) / h0);
            }
            for i in 1..m {
                let lower = x[i + 1] - x[i];
                let factor = lower / diag[i - 1];
                diag[i] -= factor * upper[i - 1];
                rhs[i] -= factor * rhs[i - 1];
            }
            d2[m] = rhs[m - 1] / diag[m - 1];
            for i in (0..m - 1).rev() {
                d2[i + 1] = (rhs[i] - upper[i] * d2[i + 2]) / diag[i];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            d2,
        })
    }

    /// Interpolated value. Outside the node range the end cubic pieces are
    /// extended.
    pub fn evaluate(&self, t: f64) -> f64 {
        let n = self.x.len();
        let k = match self.x.partition_point(|&xi| xi <= t) {
            0 => 0,
            i if i >= n => n - 2,
            i => i - 1,
        };
        let h = self.x[k + 1] - self.x[k];
        let a = (self.x[k + 1] - t) / h;
        let b = (t - self.x[k]) / h;
        a * self.y[k]
            + b * self.y[k + 1]
            + ((a * a * a - a) * self.d2[k] + (b * b * b - b) * self.d2[k + 1]) * h * h / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_nodes_and_lines() {
        let x = [0.0, 1.0, 2.5, 4.0, 6.0];
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        let s = CubicSpline::new(&x, &y).unwrap();
        for (a, b) in x.iter().zip(&y) {
            assert!((s.evaluate(*a) - b).abs() < 1e-12);
        }
        assert!((s.evaluate(3.3) - 8.9).abs() < 1e-12);
    }

    #[test]
    fn approximates_smooth_function() {
        let x: Vec<f64> = (0..11).map(|i| i as f64 * 0.3).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let s = CubicSpline::new(&x, &y).unwrap();
        assert!((s.evaluate(1.05) - 1.05f64.sin()).abs() < 1e-3);
    }

    #[test]
    fn rejects_unordered_abscissae() {
        assert!(CubicSpline::new(&[0.0, 2.0, 1.0], &[0.0, 1.0, 2.0]).is_err());
        assert!(CubicSpline::new(&[0.0], &[0.0]).is_err());
    }
}

//! Surface discretization on a regular grid with bicubic B-spline lookup.
//!
//! An expensive surface is sampled once on a uniform mesh covering a
//! reference rectangle; later queries interpolate the mesh. The cubic
//! B-spline kernel is non-negative everywhere, so the interpolated surface
//! never overshoots the samples the way Catmull–Rom kernels do.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};

/// Uniform cubic B-spline kernel.
#[inline]
fn bspline_kernel(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        (4.0 - 6.0 * t * t + 3.0 * t * t * t) / 6.0
    } else if t < 2.0 {
        let u = 2.0 - t;
        u * u * u / 6.0
    } else {
        0.0
    }
}

/// Mesh dimensions and node coordinates shared by the scalar and point grids.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mesh {
    rect: Rect,
    delta: f64,
    rows: usize,
    cols: usize,
}

impl Mesh {
    fn new(rect: Rect, delta: f64) -> Result<Self> {
        if rect.is_degenerate() {
            return Err(Error::EmptyDomain(format!(
                "grid interpolation over {:.3}x{:.3} rectangle",
                rect.width(),
                rect.height()
            )));
        }
        if !(delta > 0.0) || !delta.is_finite() {
            return Err(Error::OutOfRange {
                what: "grid spacing",
                value: delta,
            });
        }
        Ok(Self {
            rect,
            delta,
            rows: (rect.height() / delta).ceil() as usize + 1,
            cols: (rect.width() / delta).ceil() as usize + 1,
        })
    }

    /// Sample `f` at every node, rows in parallel.
    fn sample<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send + Default + Clone,
        F: Fn(Point) -> T + Sync,
    {
        let mut data = vec![T::default(); self.rows * self.cols];
        data.par_chunks_mut(self.cols).enumerate().for_each(|(r, row)| {
            let y = self.rect.y0 + r as f64 * self.delta;
            for (c, v) in row.iter_mut().enumerate() {
                *v = f(Point::new(self.rect.x0 + c as f64 * self.delta, y));
            }
        });
        data
    }

    /// Interpolate `component` of the node values at `p`. Nodes beyond the
    /// mesh border are replaced by the nearest border node.
    fn interpolate<T, G>(&self, data: &[T], p: Point, component: G) -> f64
    where
        G: Fn(&T) -> f64,
    {
        let u = (p.x - self.rect.x0) / self.delta;
        let v = (p.y - self.rect.y0) / self.delta;
        let c0 = u.floor();
        let r0 = v.floor();
        let tx = u - c0;
        let ty = v - r0;
        let (c0, r0) = (c0 as i64, r0 as i64);

        let clamp_c = |c: i64| c.clamp(0, self.cols as i64 - 1) as usize;
        let clamp_r = |r: i64| r.clamp(0, self.rows as i64 - 1) as usize;

        let mut wx = [0.0; 4];
        let mut wy = [0.0; 4];
        for k in 0..4 {
            wx[k] = bspline_kernel(tx - (k as f64 - 1.0));
            wy[k] = bspline_kernel(ty - (k as f64 - 1.0));
        }

        let mut sum = 0.0;
        for (j, wyj) in wy.iter().enumerate() {
            let row = clamp_r(r0 + j as i64 - 1) * self.cols;
            let mut acc = 0.0;
            for (i, wxi) in wx.iter().enumerate() {
                acc += wxi * component(&data[row + clamp_c(c0 + i as i64 - 1)]);
            }
            sum += wyj * acc;
        }
        sum
    }
}

/// A scalar surface discretized over a reference rectangle.
#[derive(Debug, Clone)]
pub struct GridInterpolation {
    mesh: Mesh,
    data: Vec<f64>,
}

impl GridInterpolation {
    /// Sample `f(x, y)` on a grid of spacing `delta` covering `rect`.
    pub fn new<F>(rect: Rect, delta: f64, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64 + Sync,
    {
        let mesh = Mesh::new(rect, delta)?;
        let data = mesh.sample(|p| f(p.x, p.y));
        Ok(Self { mesh, data })
    }

    pub fn rect(&self) -> Rect {
        self.mesh.rect
    }

    pub fn delta(&self) -> f64 {
        self.mesh.delta
    }

    /// Number of grid rows and columns.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.mesh.rows, self.mesh.cols)
    }

    /// Sample stored at grid row `r`, column `c`.
    pub fn node(&self, r: usize, c: usize) -> Option<f64> {
        (r < self.mesh.rows && c < self.mesh.cols).then(|| self.data[r * self.mesh.cols + c])
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.mesh.interpolate(&self.data, Point::new(x, y), |v| *v)
    }
}

/// Two synchronized grids, one per component of a point-valued surface.
#[derive(Debug, Clone)]
pub struct PointGridInterpolation {
    mesh: Mesh,
    data: Vec<Point>,
}

impl PointGridInterpolation {
    /// Sample `f` once per node of a grid of spacing `delta` covering `rect`.
    pub fn new<F>(rect: Rect, delta: f64, f: F) -> Result<Self>
    where
        F: Fn(Point) -> Point + Sync,
    {
        let mesh = Mesh::new(rect, delta)?;
        let data = mesh.sample(f);
        Ok(Self { mesh, data })
    }

    pub fn rect(&self) -> Rect {
        self.mesh.rect
    }

    pub fn delta(&self) -> f64 {
        self.mesh.delta
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.mesh.rows, self.mesh.cols)
    }

    /// Whether `p` lies inside the reference rectangle.
    pub fn includes(&self, p: Point) -> bool {
        self.mesh.rect.includes(p)
    }

    pub fn evaluate(&self, p: Point) -> Point {
        Point::new(
            self.mesh.interpolate(&self.data, p, |q| q.x),
            self.mesh.interpolate(&self.data, p, |q| q.y),
        )
    }
}

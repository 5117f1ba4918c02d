//! Reduction of redundant control points.
//!
//! Control points come in pairs `(p1, p2)` sampling a vector surface
//! `p1 -> p2`. The simplifier partitions the source points recursively into
//! quadrants. Where both output components are planar within a tolerance, the
//! region's points are replaced by a handful of representatives; elsewhere the
//! region is subdivided further. Within each region, points that deviate from
//! the fitted planes by more than the tolerance are rejected as outliers, up
//! to a configurable fraction of the region.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use tracing::debug;

use crate::geometry::{Point, Rect};

/// Parameters of the surface simplifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSimplifierConfig {
    /// Largest deviation from a plane, in output units, for a region to be
    /// considered planar. Default 0.25.
    pub tolerance: f64,
    /// Largest fraction of a region's points that may be rejected as
    /// outliers. Default 0.10.
    pub reject_fraction: f64,
    /// Regions with this many points or fewer are kept without further
    /// subdivision. Default 8.
    pub min_region_points: usize,
}

impl Default for SurfaceSimplifierConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.25,
            reject_fraction: 0.10,
            min_region_points: 8,
        }
    }
}

/// Result of a simplification pass.
#[derive(Debug, Clone, Default)]
pub struct SimplifiedPoints {
    pub p1: Vec<Point>,
    pub p2: Vec<Point>,
    /// Number of points rejected as outliers.
    pub rejected: usize,
}

const MAX_DEPTH: usize = 12;

#[derive(Debug, Clone, Copy)]
struct Plane {
    centroid: Vector3<f64>,
    normal: Vector3<f64>,
}

impl Plane {
    /// Principal-component plane through `(x, y, z)` samples.
    fn fit(samples: &[(f64, f64, f64)]) -> Option<Plane> {
        if samples.len() < 3 {
            return None;
        }
        let n = samples.len() as f64;
        let centroid = samples
            .iter()
            .fold(Vector3::zeros(), |acc, &(x, y, z)| acc + Vector3::new(x, y, z))
            / n;
        let mut covariance = Matrix3::zeros();
        for &(x, y, z) in samples {
            let d = Vector3::new(x, y, z) - centroid;
            covariance += d * d.transpose();
        }
        let eigen = SymmetricEigen::new(covariance / n);
        let smallest = eigen.eigenvalues.imin();
        let normal = eigen.eigenvectors.column(smallest).into_owned();
        if normal.z.abs() < 1e-12 {
            return None;
        }
        Some(Plane { centroid, normal })
    }

    /// Vertical distance from the plane, in `z` units.
    fn residual(&self, x: f64, y: f64, z: f64) -> f64 {
        let zp = self.centroid.z
            - (self.normal.x * (x - self.centroid.x) + self.normal.y * (y - self.centroid.y))
                / self.normal.z;
        (z - zp).abs()
    }
}

/// Simplifies paired control points.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceSimplifier {
    config: SurfaceSimplifierConfig,
}

impl SurfaceSimplifier {
    pub fn new(config: SurfaceSimplifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SurfaceSimplifierConfig {
        &self.config
    }

    /// Simplify the surface sampled by `p1[i] -> p2[i]`. Inputs of unequal
    /// length are truncated to the shorter one.
    pub fn simplify(&self, p1: &[Point], p2: &[Point]) -> SimplifiedPoints {
        let n = p1.len().min(p2.len());
        let indices: Vec<usize> = (0..n).collect();
        let mut out = SimplifiedPoints::default();
        if let Some(rect) = Rect::bounding(&p1[..n]) {
            self.simplify_region(rect, &indices, p1, p2, 0, &mut out);
        }
        debug!(
            "Surface simplifier: {} -> {} control points, {} rejected",
            n,
            out.p1.len(),
            out.rejected
        );
        out
    }

    fn simplify_region(
        &self,
        rect: Rect,
        indices: &[usize],
        p1: &[Point],
        p2: &[Point],
        depth: usize,
        out: &mut SimplifiedPoints,
    ) {
        let keep_all = |out: &mut SimplifiedPoints| {
            for &i in indices {
                out.p1.push(p1[i]);
                out.p2.push(p2[i]);
            }
        };
        if indices.len() <= self.config.min_region_points.max(3) || depth >= MAX_DEPTH {
            keep_all(out);
            return;
        }

        if let Some(kept) = self.planar_subset(indices, p1, p2) {
            out.rejected += indices.len() - kept.len();
            for i in representatives(&kept, p1) {
                out.p1.push(p1[i]);
                out.p2.push(p2[i]);
            }
            return;
        }

        let c = rect.center();
        let quadrants = [
            Rect::new(rect.x0, rect.y0, c.x, c.y),
            Rect::new(c.x, rect.y0, rect.x1, c.y),
            Rect::new(rect.x0, c.y, c.x, rect.y1),
            Rect::new(c.x, c.y, rect.x1, rect.y1),
        ];
        let mut parts: [Vec<usize>; 4] = Default::default();
        for &i in indices {
            let p = p1[i];
            let q = usize::from(p.x >= c.x) + 2 * usize::from(p.y >= c.y);
            parts[q].push(i);
        }
        if parts.iter().filter(|part| !part.is_empty()).count() <= 1 {
            // Coincident points cannot be separated any further.
            keep_all(out);
            return;
        }
        for (quadrant, part) in quadrants.iter().zip(&parts) {
            if !part.is_empty() {
                self.simplify_region(*quadrant, part, p1, p2, depth + 1, out);
            }
        }
    }

    /// Indices of the region's inliers if both output components are planar
    /// within tolerance after rejecting at most `reject_fraction` of the points.
    fn planar_subset(&self, indices: &[usize], p1: &[Point], p2: &[Point]) -> Option<Vec<usize>> {
        let sx: Vec<(f64, f64, f64)> = indices.iter().map(|&i| (p1[i].x, p1[i].y, p2[i].x)).collect();
        let sy: Vec<(f64, f64, f64)> = indices.iter().map(|&i| (p1[i].x, p1[i].y, p2[i].y)).collect();
        let px = Plane::fit(&sx)?;
        let py = Plane::fit(&sy)?;

        let deviations: Vec<f64> = sx
            .iter()
            .zip(&sy)
            .map(|(a, b)| px.residual(a.0, a.1, a.2).max(py.residual(b.0, b.1, b.2)))
            .collect();
        let outliers = deviations.iter().filter(|&&d| d > self.config.tolerance).count();
        let max_rejected = (self.config.reject_fraction * indices.len() as f64).floor() as usize;
        if outliers > max_rejected {
            return None;
        }
        if outliers == 0 {
            return Some(indices.to_vec());
        }

        // Refit without the outliers; the inliers must still be planar.
        let kept: Vec<usize> = indices
            .iter()
            .zip(&deviations)
            .filter(|&(_, &d)| d <= self.config.tolerance)
            .map(|(&i, _)| i)
            .collect();
        let sx: Vec<(f64, f64, f64)> = kept.iter().map(|&i| (p1[i].x, p1[i].y, p2[i].x)).collect();
        let sy: Vec<(f64, f64, f64)> = kept.iter().map(|&i| (p1[i].x, p1[i].y, p2[i].y)).collect();
        let px = Plane::fit(&sx)?;
        let py = Plane::fit(&sy)?;
        let planar = sx
            .iter()
            .zip(&sy)
            .all(|(a, b)| px.residual(a.0, a.1, a.2) <= self.config.tolerance && py.residual(b.0, b.1, b.2) <= self.config.tolerance);
        planar.then_some(kept)
    }
}

/// Extreme points in x and y plus the point nearest to the centroid.
fn representatives(indices: &[usize], p1: &[Point]) -> Vec<usize> {
    let by = |key: fn(&Point) -> f64, max: bool| {
        indices
            .iter()
            .copied()
            .reduce(|a, b| {
                let (ka, kb) = (key(&p1[a]), key(&p1[b]));
                if (kb > ka) == max && kb != ka {
                    b
                } else {
                    a
                }
            })
    };
    let n = indices.len() as f64;
    let centroid = indices.iter().fold(Point::default(), |acc, &i| acc + p1[i]) / n;
    let nearest = indices
        .iter()
        .copied()
        .min_by(|&a, &b| p1[a].distance_to(centroid).total_cmp(&p1[b].distance_to(centroid)));

    let mut chosen: Vec<usize> = Vec::with_capacity(5);
    for candidate in [
        by(|p| p.x, false),
        by(|p| p.x, true),
        by(|p| p.y, false),
        by(|p| p.y, true),
        nearest,
    ]
    .into_iter()
    .flatten()
    {
        if !chosen.contains(&candidate) {
            chosen.push(candidate);
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(f: impl Fn(Point) -> Point) -> (Vec<Point>, Vec<Point>) {
        let mut p1 = Vec::new();
        for i in 0..40 {
            for j in 0..40 {
                p1.push(Point::new(i as f64 * 25.0, j as f64 * 25.0));
            }
        }
        let p2 = p1.iter().map(|&p| f(p)).collect();
        (p1, p2)
    }

    #[test]
    fn affine_surface_collapses() {
        let (p1, p2) = grid(|p| Point::new(2.0 * p.x + 0.5 * p.y + 3.0, -p.x + p.y));
        let s = SurfaceSimplifier::default().simplify(&p1, &p2);
        assert!(s.p1.len() <= 5, "kept {}", s.p1.len());
        assert_eq!(s.rejected, 0);
        assert_eq!(s.p1.len(), s.p2.len());
    }

    #[test]
    fn curved_surface_keeps_more_points() {
        let (p1, p2) = grid(|p| Point::new(p.x + 1e-3 * p.x * p.x, p.y + 5.0 * (p.y / 150.0).sin()));
        let s = SurfaceSimplifier::default().simplify(&p1, &p2);
        assert!(s.p1.len() > 20);
        assert!(s.p1.len() < p1.len());
        // Every kept pair is an original pair.
        for (a, b) in s.p1.iter().zip(&s.p2) {
            let i = p1.iter().position(|p| p == a).unwrap();
            assert_eq!(p2[i], *b);
        }
    }

    #[test]
    fn outliers_are_rejected() {
        let (p1, mut p2) = grid(|p| Point::new(p.x * 0.5, p.y * 0.5));
        p2[100].x += 40.0;
        p2[900].y -= 25.0;
        let s = SurfaceSimplifier::default().simplify(&p1, &p2);
        assert!(s.rejected >= 2);
        assert!(!s.p1.contains(&p1[100]));
        assert!(!s.p1.contains(&p1[900]));
    }
}

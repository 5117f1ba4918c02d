//! Local Shepard interpolation with Franke–Little weights.
//!
//! Nodes are reduced to the unit disk about their centroid and indexed with a
//! quadtree. A query collects the nodes within a search radius `R` of the
//! evaluation point and returns their weighted mean with weights
//! `(1 - d/R)^μ`. When fewer than three nodes are in reach the radius is
//! doubled, giving up once it has reached the disk radius.

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};
use crate::quadtree::{QuadTree, QuadTreeItem};

const BUCKET_CAPACITY: usize = 16;
const MIN_NEIGHBORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShepardConfig {
    /// Initial search radius, relative to the unit disk. Default 0.10.
    pub search_radius: f64,
    /// Exponent μ of the Franke–Little weight. Default 4.
    pub power: i32,
    /// Fraction of the lowest and highest values clamped (Winsorized) before
    /// averaging, in `[0, 0.5)`. Default 0.
    pub regularization: f64,
}

impl Default for ShepardConfig {
    fn default() -> Self {
        Self {
            search_radius: 0.10,
            power: 4,
            regularization: 0.0,
        }
    }
}

impl ShepardConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.search_radius > 0.0 && self.search_radius <= 1.0) {
            return Err(Error::OutOfRange {
                what: "Shepard search radius",
                value: self.search_radius,
            });
        }
        if self.power < 1 {
            return Err(Error::OutOfRange {
                what: "Shepard power parameter",
                value: self.power as f64,
            });
        }
        if !(0.0..0.5).contains(&self.regularization) {
            return Err(Error::OutOfRange {
                what: "Shepard regularization",
                value: self.regularization,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    position: Point,
    value: f64,
}

impl QuadTreeItem for Node {
    fn position(&self) -> Point {
        self.position
    }
}

/// Shepard surface over scattered scalar samples.
#[derive(Debug, Clone)]
pub struct ShepardInterpolation {
    config: ShepardConfig,
    center: Point,
    /// Reciprocal of the largest node distance from `center`.
    scale: f64,
    tree: QuadTree<Node>,
}

impl ShepardInterpolation {
    pub fn fit(x: &[f64], y: &[f64], z: &[f64], config: &ShepardConfig) -> Result<Self> {
        config.validate()?;
        if x.len() != y.len() || x.len() != z.len() {
            return Err(Error::IncompatibleInputs(format!(
                "Shepard interpolation over {} x, {} y and {} z values",
                x.len(),
                y.len(),
                z.len()
            )));
        }
        if x.len() < MIN_NEIGHBORS {
            return Err(Error::InsufficientNodes {
                found: x.len(),
                required: MIN_NEIGHBORS,
            });
        }

        let n = x.len() as f64;
        let center = Point::new(x.iter().sum::<f64>() / n, y.iter().sum::<f64>() / n);
        let radius = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| Point::new(xi, yi).distance_to(center))
            .fold(0.0, f64::max);
        if !(radius > 0.0) {
            return Err(Error::EmptyDomain("Shepard nodes are coincident".into()));
        }
        let scale = 1.0 / radius;

        let nodes: Vec<Node> = x
            .iter()
            .zip(y)
            .zip(z)
            .map(|((&xi, &yi), &zi)| Node {
                position: (Point::new(xi, yi) - center) * scale,
                value: zi,
            })
            .collect();
        let tree = QuadTree::build(nodes, BUCKET_CAPACITY);
        Ok(Self {
            config: *config,
            center,
            scale,
            tree,
        })
    }

    pub fn config(&self) -> &ShepardConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let p = (Point::new(x, y) - self.center) * self.scale;
        let mut radius = self.config.search_radius;
        let mut found: Vec<(f64, f64)> = Vec::new();
        loop {
            found.clear();
            let window = Rect::new(p.x - radius, p.y - radius, p.x + radius, p.y + radius);
            self.tree.search(&window, |node| {
                let d = node.position.distance_to(p);
                if d < radius {
                    found.push((node.value, (1.0 - d / radius).powi(self.config.power)));
                }
            });
            if found.len() >= MIN_NEIGHBORS {
                break;
            }
            if radius >= 1.0 {
                return 0.0;
            }
            radius *= 2.0;
        }

        if self.config.regularization > 0.0 {
            winsorize(&mut found, self.config.regularization);
        }
        let (sz, sw) = found
            .iter()
            .fold((0.0, 0.0), |(sz, sw), &(z, w)| (sz + w * z, sw + w));
        if sw <= f64::EPSILON {
            0.0
        } else {
            sz / sw
        }
    }
}

/// Clamp the `fraction·m` lowest and highest values of `(value, weight)`
/// pairs to the nearest unclamped value.
fn winsorize(samples: &mut [(f64, f64)], fraction: f64) {
    let m = samples.len();
    let q = (fraction * m as f64) as usize;
    if q == 0 || 2 * q >= m {
        return;
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    let low = samples[q].0;
    let high = samples[m - q - 1].0;
    for s in &mut samples[..q] {
        s.0 = low;
    }
    for s in &mut samples[m - q..] {
        s.0 = high;
    }
}

/// Shepard interpolation of a point-valued surface `p1 -> p2`.
#[derive(Debug, Clone)]
pub struct PointShepardInterpolation {
    sx: ShepardInterpolation,
    sy: ShepardInterpolation,
}

impl PointShepardInterpolation {
    pub fn fit(p1: &[Point], p2: &[Point], config: &ShepardConfig) -> Result<Self> {
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
        Ok(Self {
            sx: ShepardInterpolation::fit(&x, &y, &zx, config)?,
            sy: ShepardInterpolation::fit(&x, &y, &zy, config)?,
        })
    }

    pub fn evaluate(&self, p: Point) -> Point {
        Point::new(self.sx.evaluate(p.x, p.y), self.sy.evaluate(p.x, p.y))
    }
}

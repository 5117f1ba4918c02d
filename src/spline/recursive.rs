//! Quadtree-partitioned point surface splines for large node sets.
//!
//! Generating a thin-plate spline costs O(n³), so large control-point sets
//! are split with a quadtree and one sub-spline is generated per leaf. Each
//! sub-spline also sees a halo of nearby points from the eight surrounding
//! regions, which keeps adjacent sub-splines in agreement along their shared
//! boundaries.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};
use crate::parallel;
use crate::quadtree::{QuadTree, QuadTreeItem};

use super::point::PointSurfaceSpline;
use super::thin_plate::SurfaceSplineConfig;

/// Partitioning depth beyond which node sets are fitted directly.
const MAX_DEPTH: usize = 8;

/// Smallest node set of a sub-spline. Sparse leaves borrow their nearest
/// points from the whole tree up to this count.
const MIN_LEAF_NODES: usize = 16;

/// Parameters of a recursive point surface spline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecursiveSplineConfig {
    /// Parameters of every generated sub-spline.
    pub spline: SurfaceSplineConfig,
    /// Largest node set fitted by a single spline. Default 1600.
    pub max_spline_length: usize,
    /// Quadtree bucket capacity used when partitioning. Default 64.
    pub bucket_capacity: usize,
    /// Evaluate outside the node domain instead of returning the origin.
    /// Default true.
    pub allow_extrapolation: bool,
    /// Upper bound on worker threads; zero uses the whole rayon pool.
    pub max_threads: usize,
}

impl Default for RecursiveSplineConfig {
    fn default() -> Self {
        Self {
            spline: SurfaceSplineConfig::default(),
            max_spline_length: 1600,
            bucket_capacity: 64,
            allow_extrapolation: true,
            max_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedPoint {
    position: Point,
    index: usize,
}

impl QuadTreeItem for IndexedPoint {
    fn position(&self) -> Point {
        self.position
    }
}

#[derive(Debug, Clone)]
enum Model {
    Direct {
        spline: PointSurfaceSpline,
        rect: Rect,
    },
    Partitioned {
        tree: QuadTree<IndexedPoint, Box<RecursivePointSurfaceSpline>>,
    },
}

/// A point surface spline that is either a single spline or a quadtree of
/// recursively built sub-splines.
#[derive(Debug, Clone)]
pub struct RecursivePointSurfaceSpline {
    model: Model,
    allow_extrapolation: bool,
}

impl RecursivePointSurfaceSpline {
    /// Build a spline mapping `p1[i]` to `p2[i]` with optional per-pair weights.
    pub fn fit(
        p1: &[Point],
        p2: &[Point],
        weights: Option<&[f64]>,
        config: &RecursiveSplineConfig,
    ) -> Result<Self> {
        if p1.len() != p2.len() {
            return Err(Error::IncompatibleInputs(format!(
                "{} source points paired with {} target points",
                p1.len(),
                p2.len()
            )));
        }
        if let Some(w) = weights {
            if w.len() != p1.len() {
                return Err(Error::IncompatibleInputs(format!(
                    "{} weights supplied for {} control points",
                    w.len(),
                    p1.len()
                )));
            }
        }
        let spline = Self::build(p1, p2, weights, config, 0)?;
        if spline.is_recursive() {
            info!(
                "Recursive surface spline: {} control points in {} sub-splines",
                p1.len(),
                spline.sub_spline_count()
            );
        }
        Ok(spline)
    }

    fn direct(
        p1: &[Point],
        p2: &[Point],
        weights: Option<&[f64]>,
        config: &RecursiveSplineConfig,
    ) -> Result<Self> {
        let spline = PointSurfaceSpline::fit(p1, p2, weights, &config.spline)?;
        let rect = Rect::bounding(p1).unwrap_or_default();
        Ok(Self {
            model: Model::Direct { spline, rect },
            allow_extrapolation: config.allow_extrapolation,
        })
    }

    fn build(
        p1: &[Point],
        p2: &[Point],
        weights: Option<&[f64]>,
        config: &RecursiveSplineConfig,
        depth: usize,
    ) -> Result<Self> {
        let max_length = config.max_spline_length.max(3);
        if p1.len() <= max_length || depth >= MAX_DEPTH {
            return Self::direct(p1, p2, weights, config);
        }

        let rect = Rect::bounding(p1).unwrap_or_default().squared();
        let items: Vec<IndexedPoint> = p1
            .iter()
            .enumerate()
            .map(|(index, &position)| IndexedPoint { position, index })
            .collect();
        let mut tree: QuadTree<IndexedPoint, Box<RecursivePointSurfaceSpline>> =
            QuadTree::build_in(rect, items, config.bucket_capacity);
        if tree.leaf_count() <= 1 {
            return Self::direct(p1, p2, weights, config);
        }

        let mut node_sets: Vec<Vec<usize>> = Vec::new();
        tree.traverse(|leaf| {
            node_sets.push(halo_node_set(&tree, leaf.rect, leaf.points, max_length));
        });
        debug!(
            "Recursive surface spline: depth {depth}, {} leaves, quadtree height {}",
            node_sets.len(),
            tree.height()
        );

        let child_config = RecursiveSplineConfig {
            allow_extrapolation: true,
            ..*config
        };
        let chunks = parallel::map_ranges(node_sets.len(), 1, config.max_threads, |range| {
            range
                .map(|i| {
                    let set = &node_sets[i];
                    let q1: Vec<Point> = set.iter().map(|&k| p1[k]).collect();
                    let q2: Vec<Point> = set.iter().map(|&k| p2[k]).collect();
                    let w: Option<Vec<f64>> = weights.map(|w| set.iter().map(|&k| w[k]).collect());
                    Self::build(&q1, &q2, w.as_deref(), &child_config, depth + 1)
                })
                .collect::<Vec<_>>()
        });
        let children: Vec<Self> = chunks.into_iter().flatten().collect::<Result<_>>()?;

        let mut children = children.into_iter();
        tree.traverse_data_mut(|_, _, data| {
            *data = children.next().map(Box::new);
        });

        Ok(Self {
            model: Model::Partitioned { tree },
            allow_extrapolation: config.allow_extrapolation,
        })
    }

    /// True if this spline is partitioned into sub-splines.
    pub fn is_recursive(&self) -> bool {
        matches!(self.model, Model::Partitioned { .. })
    }

    /// Number of directly generated splines below this one.
    pub fn sub_spline_count(&self) -> usize {
        match &self.model {
            Model::Direct { .. } => 1,
            Model::Partitioned { tree } => {
                let mut count = 0;
                tree.traverse(|leaf| count += leaf.data.map_or(0, |child| child.sub_spline_count()));
                count
            }
        }
    }

    pub fn allows_extrapolation(&self) -> bool {
        self.allow_extrapolation
    }

    /// The single underlying spline of a non-partitioned instance.
    pub fn direct_spline(&self) -> Option<&PointSurfaceSpline> {
        match &self.model {
            Model::Direct { spline, .. } => Some(spline),
            Model::Partitioned { .. } => None,
        }
    }

    pub fn evaluate(&self, p: Point) -> Point {
        match &self.model {
            Model::Direct { spline, rect } => {
                if self.allow_extrapolation || rect.includes(p) {
                    spline.evaluate(p)
                } else {
                    Point::default()
                }
            }
            Model::Partitioned { tree } => {
                let root = tree.rect();
                let q = if root.includes(p) {
                    p
                } else if self.allow_extrapolation {
                    root.clamp(p)
                } else {
                    return Point::default();
                };

                let mut sum = Point::default();
                let mut count = 0usize;
                for leaf in tree.leaves_containing(q) {
                    if let Some(child) = leaf.data {
                        sum += child.evaluate(p);
                        count += 1;
                    }
                }
                if count > 0 {
                    return sum / count as f64;
                }

                // The query falls in an empty quadrant.
                tree.nearest_leaf(q)
                    .and_then(|leaf| leaf.data)
                    .map_or(Point::default(), |child| child.evaluate(p))
            }
        }
    }
}

/// Leaf points plus the halo drawn from the eight surrounding regions,
/// as indexes into the control-point arrays.
fn halo_node_set(
    tree: &QuadTree<IndexedPoint, Box<RecursivePointSurfaceSpline>>,
    leaf_rect: Rect,
    leaf_points: &[IndexedPoint],
    max_length: usize,
) -> Vec<usize> {
    let mut set: Vec<usize> = leaf_points.iter().map(|p| p.index).collect();
    if set.len() >= max_length {
        set.truncate(max_length);
        return set;
    }
    let mut seen: HashSet<usize> = set.iter().copied().collect();
    let per_region = (max_length - set.len()) / 8;
    if per_region > 0 {
        add_halo(tree, leaf_rect, per_region, &mut set, &mut seen);
    }

    let required = MIN_LEAF_NODES.min(max_length);
    if set.len() < required {
        let center = leaf_rect.center();
        let mut nearest: Vec<(f64, usize)> = tree
            .search_collect(&tree.rect())
            .into_iter()
            .filter(|p| !seen.contains(&p.index))
            .map(|p| (p.position.squared_distance_to(center), p.index))
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        set.extend(nearest.into_iter().take(required - set.len()).map(|(_, index)| index));
    }
    set
}

/// Up to `per_region` points from each of the eight regions surrounding
/// `leaf_rect`, nearest to its center first.
fn add_halo(
    tree: &QuadTree<IndexedPoint, Box<RecursivePointSurfaceSpline>>,
    leaf_rect: Rect,
    per_region: usize,
    set: &mut Vec<usize>,
    seen: &mut HashSet<usize>,
) {
    let w = leaf_rect.width();
    let h = leaf_rect.height();
    let center = leaf_rect.center();
    let radius = 1.5 * w.max(h);

    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let region = leaf_rect.translated_by(Point::new(dx as f64 * w, dy as f64 * h));
            let mut candidates: Vec<(f64, usize)> = tree
                .search_collect(&region)
                .into_iter()
                .filter(|p| !seen.contains(&p.index))
                .map(|p| (p.position.distance_to(center), p.index))
                .filter(|&(d, _)| d <= radius)
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
            for (_, index) in candidates.into_iter().take(per_region) {
                if seen.insert(index) {
                    set.push(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn distortion(p: Point) -> Point {
        Point::new(
            1.02 * p.x + 0.01 * p.y + 3.0 + 2.0 * (p.x / 300.0).sin(),
            -0.01 * p.x + 0.98 * p.y - 5.0 + 1.5 * (p.y / 250.0).cos(),
        )
    }

    fn samples(n: usize) -> (Vec<Point>, Vec<Point>) {
        let mut rng = StdRng::seed_from_u64(11);
        let p1: Vec<Point> = (0..n)
            .map(|_| Point::new(rng.random_range(0.0..2000.0), rng.random_range(0.0..1500.0)))
            .collect();
        let p2 = p1.iter().map(|&p| distortion(p)).collect();
        (p1, p2)
    }

    #[test]
    fn small_sets_use_a_single_spline() {
        let (p1, p2) = samples(200);
        let s = RecursivePointSurfaceSpline::fit(&p1, &p2, None, &RecursiveSplineConfig::default()).unwrap();
        assert!(!s.is_recursive());
        assert!(s.direct_spline().is_some());
        for (a, b) in p1.iter().zip(&p2).take(20) {
            assert!((s.evaluate(*a) - *b).norm() < 1e-6);
        }
    }

    #[test]
    fn large_sets_are_partitioned_and_accurate() {
        let (p1, p2) = samples(1200);
        let config = RecursiveSplineConfig {
            max_spline_length: 300,
            bucket_capacity: 100,
            ..Default::default()
        };
        let s = RecursivePointSurfaceSpline::fit(&p1, &p2, None, &config).unwrap();
        assert!(s.is_recursive());
        assert!(s.sub_spline_count() >= 4);
        for (a, b) in p1.iter().zip(&p2).step_by(7) {
            let err = (s.evaluate(*a) - *b).norm();
            assert!(err < 1e-3, "node error {err}");
        }
        let probe = Point::new(1000.0, 700.0);
        let err = (s.evaluate(probe) - distortion(probe)).norm();
        assert!(err < 0.05, "interpolation error {err}");
        // Outside the root rectangle the nearest edge leaf extrapolates.
        let outside = s.evaluate(Point::new(-50.0, 700.0));
        assert!(outside.is_finite());
        assert!((outside - distortion(Point::new(-50.0, 700.0))).norm() < 5.0);
    }

    #[test]
    fn isolated_point_borrows_nearest_nodes() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut p1: Vec<Point> = (0..1700)
            .map(|_| Point::new(rng.random_range(0.0..100.0), rng.random_range(0.0..100.0)))
            .collect();
        p1.push(Point::new(1000.0, 1000.0));
        let affine = |p: Point| Point::new(2.0 * p.x - 0.5 * p.y + 10.0, 0.3 * p.x + 1.5 * p.y - 4.0);
        let p2: Vec<Point> = p1.iter().map(|&p| affine(p)).collect();

        let s = RecursivePointSurfaceSpline::fit(&p1, &p2, None, &RecursiveSplineConfig::default()).unwrap();
        assert!(s.is_recursive());
        for p in [Point::new(1000.0, 1000.0), Point::new(50.0, 50.0), Point::new(600.0, 700.0)] {
            let err = (s.evaluate(p) - affine(p)).norm();
            assert!(err < 1e-4, "{p:?}: error {err}");
        }
    }

    #[test]
    fn extrapolation_can_be_disabled() {
        let (p1, p2) = samples(100);
        let config = RecursiveSplineConfig {
            allow_extrapolation: false,
            ..Default::default()
        };
        let s = RecursivePointSurfaceSpline::fit(&p1, &p2, None, &config).unwrap();
        assert_eq!(s.evaluate(Point::new(-500.0, -500.0)), Point::default());
    }
}

//! Bucket point-region quadtree.
//!
//! Structural nodes split their rectangle at the center into four children
//! (NW, NE, SW, SE, with `y` growing downwards so "north" is the smaller `y`).
//! Leaves hold up to `bucket_capacity` points and an optional payload of type
//! `D`. A leaf whose half-extent would fall below `2·ε` is never split and may
//! hold more points than the capacity.
//!
//! Points are routed with half-open tests against the split center: a point
//! with `x < xc` goes west, otherwise east; `y < yc` goes north, otherwise
//! south.

use crate::geometry::{Point, Rect};

/// Anything that can be indexed by its planar position.
pub trait QuadTreeItem: Clone {
    fn position(&self) -> Point;
}

impl QuadTreeItem for Point {
    fn position(&self) -> Point {
        *self
    }
}

#[derive(Debug, Clone)]
enum Node<T, D> {
    Structural {
        rect: Rect,
        /// NW, NE, SW, SE.
        children: Box<[Node<T, D>; 4]>,
    },
    Leaf {
        rect: Rect,
        points: Vec<T>,
        data: Option<D>,
    },
}

/// A leaf as seen by traversal and lookup functions.
#[derive(Debug)]
pub struct LeafRef<'a, T, D> {
    pub rect: Rect,
    pub points: &'a [T],
    pub data: Option<&'a D>,
}

/// A node of a tree flattened in depth-first order.
#[derive(Debug)]
pub enum FlatNode<'a, T> {
    /// Indexes of the NW, NE, SW, SE children in the flattened array. The
    /// root sits at index zero, so zero marks an empty child.
    Structural { rect: Rect, children: [u32; 4] },
    Leaf { rect: Rect, points: &'a [T] },
}

/// Quadtree over items of type `T` with optional per-leaf payloads `D`.
#[derive(Debug, Clone)]
pub struct QuadTree<T, D = ()> {
    rect: Rect,
    root: Option<Node<T, D>>,
    bucket_capacity: usize,
    len: usize,
}

fn is_degenerate(rect: &Rect) -> bool {
    rect.width() / 2.0 < 2.0 * f64::EPSILON || rect.height() / 2.0 < 2.0 * f64::EPSILON
}

fn quadrant_rects(rect: &Rect) -> [Rect; 4] {
    let c = rect.center();
    [
        Rect::new(rect.x0, rect.y0, c.x, c.y),
        Rect::new(c.x, rect.y0, rect.x1, c.y),
        Rect::new(rect.x0, c.y, c.x, rect.y1),
        Rect::new(c.x, c.y, rect.x1, rect.y1),
    ]
}

fn quadrant_of(rect: &Rect, p: Point) -> usize {
    let c = rect.center();
    let east = usize::from(p.x >= c.x);
    let south = usize::from(p.y >= c.y);
    south * 2 + east
}

fn build_node<T: QuadTreeItem, D>(rect: Rect, points: Vec<T>, capacity: usize) -> Node<T, D> {
    if points.len() <= capacity || is_degenerate(&rect) {
        return Node::Leaf {
            rect,
            points,
            data: None,
        };
    }
    let rects = quadrant_rects(&rect);
    let mut parts: [Vec<T>; 4] = Default::default();
    for p in points {
        parts[quadrant_of(&rect, p.position())].push(p);
    }
    let [nw, ne, sw, se] = parts;
    Node::Structural {
        rect,
        children: Box::new([
            build_node(rects[0], nw, capacity),
            build_node(rects[1], ne, capacity),
            build_node(rects[2], sw, capacity),
            build_node(rects[3], se, capacity),
        ]),
    }
}

fn insert_in<T: QuadTreeItem, D>(node: &mut Node<T, D>, item: T, capacity: usize) {
    match node {
        Node::Structural { rect, children } => {
            let q = quadrant_of(rect, item.position());
            insert_in(&mut children[q], item, capacity);
        }
        Node::Leaf { rect, points, .. } => {
            if points.len() < capacity || is_degenerate(rect) {
                points.push(item);
            } else {
                let leaf_rect = *rect;
                let mut all = std::mem::take(points);
                all.push(item);
                *node = build_node(leaf_rect, all, capacity);
            }
        }
    }
}

impl<T: QuadTreeItem, D> QuadTree<T, D> {
    /// An empty tree covering `rect`.
    pub fn new(rect: Rect, bucket_capacity: usize) -> Self {
        Self {
            rect,
            root: None,
            bucket_capacity: bucket_capacity.max(1),
            len: 0,
        }
    }

    /// Build a tree over `points`, covering their bounding rectangle.
    pub fn build(points: Vec<T>, bucket_capacity: usize) -> Self {
        let positions: Vec<Point> = points.iter().map(|p| p.position()).collect();
        let rect = Rect::bounding(&positions).unwrap_or_default();
        Self::build_in(rect, points, bucket_capacity)
    }

    /// Build a tree over `points` covering `rect`. Points outside `rect` are
    /// discarded.
    pub fn build_in(rect: Rect, points: Vec<T>, bucket_capacity: usize) -> Self {
        let capacity = bucket_capacity.max(1);
        let points: Vec<T> = points.into_iter().filter(|p| rect.includes(p.position())).collect();
        let len = points.len();
        let root = if points.is_empty() {
            None
        } else {
            Some(build_node(rect, points, capacity))
        };
        Self {
            rect,
            root,
            bucket_capacity: capacity,
            len,
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Total number of stored points.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a point. Returns `false` if the point lies outside the tree rectangle.
    pub fn insert(&mut self, item: T) -> bool {
        if !self.rect.includes(item.position()) {
            return false;
        }
        match &mut self.root {
            Some(root) => insert_in(root, item, self.bucket_capacity),
            None => {
                self.root = Some(Node::Leaf {
                    rect: self.rect,
                    points: vec![item],
                    data: None,
                })
            }
        }
        self.len += 1;
        true
    }

    /// Remove every point equal (component-wise in position) to `p`.
    /// Returns the number of removed points.
    pub fn delete_point(&mut self, p: Point) -> usize {
        let removed = match &mut self.root {
            Some(root) => delete_in(root, &|q: Point| q == p, &Rect::from_points(p, p)),
            None => 0,
        };
        self.len -= removed;
        removed
    }

    /// Remove every point inside the closed rectangle `r`.
    pub fn delete_rect(&mut self, r: &Rect) -> usize {
        let removed = match &mut self.root {
            Some(root) => delete_in(root, &|q: Point| r.includes(q), r),
            None => 0,
        };
        self.len -= removed;
        removed
    }

    /// Call `visitor` once for each point inside the closed rectangle `r`.
    pub fn search<F: FnMut(&T)>(&self, r: &Rect, mut visitor: F) {
        if let Some(root) = &self.root {
            search_in(root, r, &mut visitor);
        }
    }

    /// Collect the points inside the closed rectangle `r`.
    pub fn search_collect(&self, r: &Rect) -> Vec<T> {
        let mut found = Vec::new();
        self.search(r, |p| found.push(p.clone()));
        found
    }

    /// Depth-first NW, NE, SW, SE visit of non-empty leaves.
    pub fn traverse<'a, F: FnMut(LeafRef<'a, T, D>)>(&'a self, mut visitor: F) {
        if let Some(root) = &self.root {
            traverse_in(root, &mut visitor);
        }
    }

    /// Same visiting order as [`traverse`](Self::traverse), with mutable access
    /// to leaf payloads.
    pub fn traverse_data_mut<F: FnMut(Rect, &[T], &mut Option<D>)>(&mut self, mut visitor: F) {
        if let Some(root) = &mut self.root {
            traverse_mut_in(root, &mut visitor);
        }
    }

    /// Rectangles of every leaf, empty ones included, in traversal order.
    pub fn leaf_rects(&self) -> Vec<Rect> {
        fn collect<T, D>(node: &Node<T, D>, out: &mut Vec<Rect>) {
            match node {
                Node::Leaf { rect, .. } => out.push(*rect),
                Node::Structural { children, .. } => children.iter().for_each(|c| collect(c, out)),
            }
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            collect(root, &mut out);
        }
        out
    }

    /// Number of non-empty leaves.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.traverse(|_| count += 1);
        count
    }

    /// Maximum depth of the tree; zero for an empty tree, one for a single leaf.
    pub fn height(&self) -> usize {
        fn depth<T, D>(node: &Node<T, D>) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Structural { children, .. } => {
                    1 + children.iter().map(|c| depth(c)).max().unwrap_or(0)
                }
            }
        }
        self.root.as_ref().map_or(0, depth)
    }

    /// Non-empty leaves whose closed rectangle includes `p`. More than one
    /// leaf is returned only for points lying on shared leaf boundaries.
    pub fn leaves_containing(&self, p: Point) -> Vec<LeafRef<'_, T, D>> {
        let mut found = Vec::new();
        if let Some(root) = &self.root {
            leaves_containing_in(root, p, &mut found);
        }
        found
    }

    /// Every node in depth-first NW, NE, SW, SE order, root first. Empty
    /// leaves are omitted; an empty tree flattens to nothing.
    pub fn flatten(&self) -> Vec<FlatNode<'_, T>> {
        fn push<'a, T, D>(node: &'a Node<T, D>, out: &mut Vec<FlatNode<'a, T>>) -> u32 {
            let index = out.len() as u32;
            match node {
                Node::Leaf { rect, points, .. } => out.push(FlatNode::Leaf { rect: *rect, points }),
                Node::Structural { rect, children } => {
                    out.push(FlatNode::Structural {
                        rect: *rect,
                        children: [0; 4],
                    });
                    let mut indexes = [0u32; 4];
                    for (slot, child) in indexes.iter_mut().zip(children.iter()) {
                        let empty = matches!(child, Node::Leaf { points, .. } if points.is_empty());
                        if !empty {
                            *slot = push(child, out);
                        }
                    }
                    if let FlatNode::Structural { children, .. } = &mut out[index as usize] {
                        *children = indexes;
                    }
                }
            }
            index
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            push(root, &mut out);
        }
        out
    }

    /// The non-empty leaf whose rectangle is nearest to `p`.
    pub fn nearest_leaf(&self, p: Point) -> Option<LeafRef<'_, T, D>> {
        let mut best: Option<(f64, LeafRef<'_, T, D>)> = None;
        self.traverse(|leaf| {
            let d = leaf.rect.distance_to(p);
            if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
                best = Some((d, leaf));
            }
        });
        best.map(|(_, leaf)| leaf)
    }
}

fn search_in<T: QuadTreeItem, D, F: FnMut(&T)>(node: &Node<T, D>, r: &Rect, visitor: &mut F) {
    match node {
        Node::Structural { rect, children } => {
            if rect.intersects(r) {
                for child in children.iter() {
                    search_in(child, r, visitor);
                }
            }
        }
        Node::Leaf { rect, points, .. } => {
            if rect.intersects(r) {
                for p in points.iter().filter(|p| r.includes(p.position())) {
                    visitor(p);
                }
            }
        }
    }
}

fn traverse_in<'a, T, D, F: FnMut(LeafRef<'a, T, D>)>(node: &'a Node<T, D>, visitor: &mut F) {
    match node {
        Node::Structural { children, .. } => {
            for child in children.iter() {
                traverse_in(child, visitor);
            }
        }
        Node::Leaf { rect, points, data } => {
            if !points.is_empty() {
                visitor(LeafRef {
                    rect: *rect,
                    points,
                    data: data.as_ref(),
                });
            }
        }
    }
}

fn traverse_mut_in<T, D, F: FnMut(Rect, &[T], &mut Option<D>)>(node: &mut Node<T, D>, visitor: &mut F) {
    match node {
        Node::Structural { children, .. } => {
            for child in children.iter_mut() {
                traverse_mut_in(child, visitor);
            }
        }
        Node::Leaf { rect, points, data } => {
            if !points.is_empty() {
                visitor(*rect, points, data);
            }
        }
    }
}

fn leaves_containing_in<'a, T, D>(node: &'a Node<T, D>, p: Point, found: &mut Vec<LeafRef<'a, T, D>>) {
    match node {
        Node::Structural { rect, children } => {
            if rect.includes(p) {
                for child in children.iter() {
                    leaves_containing_in(child, p, found);
                }
            }
        }
        Node::Leaf { rect, points, data } => {
            if !points.is_empty() && rect.includes(p) {
                found.push(LeafRef {
                    rect: *rect,
                    points,
                    data: data.as_ref(),
                });
            }
        }
    }
}

/// Remove matching points below `node`, collapsing structural nodes whose
/// children all became empty leaves. Returns the number of removed points.
fn delete_in<T: QuadTreeItem, D, F: Fn(Point) -> bool>(node: &mut Node<T, D>, matches: &F, bounds: &Rect) -> usize {
    let mut collapse_to = None;
    let removed = match node {
        Node::Leaf { rect, points, .. } => {
            if !rect.intersects(bounds) {
                return 0;
            }
            let before = points.len();
            points.retain(|p| !matches(p.position()));
            before - points.len()
        }
        Node::Structural { rect, children } => {
            if !rect.intersects(bounds) {
                return 0;
            }
            let removed: usize = children.iter_mut().map(|c| delete_in(c, matches, bounds)).sum();
            let all_empty = children
                .iter()
                .all(|c| matches!(c, Node::Leaf { points, .. } if points.is_empty()));
            if all_empty {
                collapse_to = Some(*rect);
            }
            removed
        }
    };
    if let Some(rect) = collapse_to {
        *node = Node::Leaf {
            rect,
            points: Vec::new(),
            data: None,
        };
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn flatten_links_children() {
        let points: Vec<Point> = (0..64)
            .map(|i| Point::new((i % 8) as f64, (i / 8) as f64))
            .collect();
        let tree: QuadTree<Point> = QuadTree::build(points, 8);
        let flat = tree.flatten();
        let mut seen = 0;
        for node in &flat {
            match node {
                FlatNode::Leaf { points, .. } => seen += points.len(),
                FlatNode::Structural { rect, children } => {
                    for &c in children.iter().filter(|&&c| c != 0) {
                        let child_rect = match &flat[c as usize] {
                            FlatNode::Leaf { rect, .. } | FlatNode::Structural { rect, .. } => *rect,
                        };
                        assert!(rect.includes(child_rect.center()));
                    }
                }
            }
        }
        assert_eq!(seen, 64);
        assert!(QuadTree::<Point>::new(Rect::new(0.0, 0.0, 1.0, 1.0), 4).flatten().is_empty());
    }

    fn random_points(n: usize, seed: u64) -> Vec<Point> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| Point::new(rng.random_range(0.0..1000.0), rng.random_range(0.0..1000.0)))
            .collect()
    }

    #[test]
    fn leaves_partition_points_and_respect_capacity() {
        let pts = random_points(5000, 1);
        let tree: QuadTree<Point> = QuadTree::build(pts.clone(), 16);
        let mut total = 0;
        tree.traverse(|leaf| {
            total += leaf.points.len();
            assert!(leaf.points.len() <= 16);
            for p in leaf.points {
                assert!(leaf.rect.includes(*p));
            }
        });
        assert_eq!(total, pts.len());
        assert_eq!(tree.len(), pts.len());
        assert!(tree.height() > 2);
    }

    #[test]
    fn each_interior_point_has_one_leaf() {
        let pts = random_points(2000, 2);
        let tree: QuadTree<Point> = QuadTree::build_in(Rect::new(0.0, 0.0, 1000.0, 1000.0), pts, 8);
        let rects = tree.leaf_rects();
        let probes = random_points(500, 3);
        for q in probes {
            let containing = rects
                .iter()
                .filter(|r| q.x >= r.x0 && q.x < r.x1 && q.y >= r.y0 && q.y < r.y1)
                .count();
            assert_eq!(containing, 1, "probe {q:?}");
        }
    }

    #[test]
    fn insert_then_search_matches_scan() {
        let pts = random_points(3000, 4);
        let mut tree: QuadTree<Point> = QuadTree::new(Rect::new(0.0, 0.0, 1000.0, 1000.0), 32);
        for p in &pts {
            assert!(tree.insert(*p));
        }
        assert!(!tree.insert(Point::new(-1.0, 5.0)));
        let r = Rect::new(250.0, 100.0, 420.0, 333.0);
        let found = tree.search_collect(&r);
        let expected = pts.iter().filter(|p| r.includes(**p)).count();
        assert_eq!(found.len(), expected);
        tree.traverse(|leaf| assert!(leaf.points.len() <= 32));
    }

    #[test]
    fn degenerate_leaf_may_overflow() {
        let pts = vec![Point::new(5.0, 5.0); 40];
        let tree: QuadTree<Point> = QuadTree::build(pts, 4);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.len(), 40);
    }

    #[test]
    fn deletion_collapses_empty_nodes() {
        let pts = random_points(400, 5);
        let mut tree: QuadTree<Point> = QuadTree::build_in(Rect::new(0.0, 0.0, 1000.0, 1000.0), pts.clone(), 4);
        let removed = tree.delete_point(pts[17]);
        assert_eq!(removed, 1);
        assert_eq!(tree.len(), 399);
        let left = Rect::new(0.0, 0.0, 500.0, 1000.0);
        let in_left = pts.iter().filter(|p| left.includes(**p)).count() - usize::from(left.includes(pts[17]));
        assert_eq!(tree.delete_rect(&left), in_left);
        assert!(tree.search_collect(&left).is_empty());
        let all = tree.delete_rect(&Rect::new(0.0, 0.0, 1000.0, 1000.0));
        assert_eq!(all, 399 - in_left);
        assert!(tree.is_empty());
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn boundary_points_belong_to_several_leaves() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 10.0),
        ];
        let tree: QuadTree<Point> = QuadTree::build(pts, 1);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaves_containing(Point::new(5.0, 5.0)).len(), 4);
        assert_eq!(tree.leaves_containing(Point::new(1.0, 1.0)).len(), 1);
        let nearest = tree.nearest_leaf(Point::new(20.0, 20.0)).unwrap();
        assert_eq!(nearest.points[0], Point::new(10.0, 10.0));
    }
}

//! Integration tests: spatial queries on a quadtree of uniformly scattered
//! points checked against linear scans.

use astrometry::{Point, QuadTree, Rect};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn scatter(n: usize, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Point::new(rng.random_range(0.0..=1000.0), rng.random_range(0.0..=1000.0)))
        .collect()
}

#[test]
fn test_rectangular_search_matches_linear_scan() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    // ── Step 1: Build ──
    let points = scatter(10_000, 7);
    let tree: QuadTree<Point> = QuadTree::build(points.clone(), 32);
    println!(
        "Quadtree: {} points, {} leaves, height {}",
        tree.len(),
        tree.leaf_count(),
        tree.height()
    );
    assert_eq!(tree.len(), 10_000);
    let mut leaf_total = 0;
    tree.traverse(|leaf| {
        assert!(leaf.points.len() <= 32);
        assert!(leaf.points.iter().all(|p| leaf.rect.includes(*p)));
        leaf_total += leaf.points.len();
    });
    assert_eq!(leaf_total, 10_000);

    // ── Step 2: Search ──
    let rect = Rect::new(100.0, 300.0, 200.0, 400.0);
    let found = tree.search_collect(&rect);
    let expected = points.iter().filter(|p| rect.includes(**p)).count();
    println!("Search [100,200]x[300,400]: {} points (linear scan {expected})", found.len());
    assert!(expected > 0);
    assert_eq!(found.len(), expected);
    assert!(found.iter().all(|p| rect.includes(*p)));

    // ── Step 3: Rectangles of other shapes ──
    for rect in [
        Rect::new(0.0, 0.0, 1000.0, 1000.0),
        Rect::new(999.0, 999.0, 1200.0, 1200.0),
        Rect::new(-50.0, 480.0, 1050.0, 481.0),
        Rect::new(2000.0, 2000.0, 3000.0, 3000.0),
    ] {
        let expected = points.iter().filter(|p| rect.includes(**p)).count();
        assert_eq!(tree.search_collect(&rect).len(), expected, "{rect:?}");
    }
}

#[test]
fn test_insert_and_delete() {
    let points = scatter(2_000, 11);
    let mut tree: QuadTree<Point> = QuadTree::new(Rect::new(0.0, 0.0, 1000.0, 1000.0), 16);
    for p in &points {
        assert!(tree.insert(*p));
    }
    assert!(!tree.insert(Point::new(1500.0, 10.0)));
    assert_eq!(tree.len(), 2_000);

    let rect = Rect::new(250.0, 250.0, 750.0, 750.0);
    let inside = points.iter().filter(|p| rect.includes(**p)).count();
    assert_eq!(tree.delete_rect(&rect), inside);
    assert_eq!(tree.len(), 2_000 - inside);
    assert!(tree.search_collect(&rect).is_empty());

    let survivor = *points.iter().find(|p| !rect.includes(**p)).unwrap();
    assert_eq!(tree.delete_point(survivor), 1);
    assert_eq!(tree.len(), 2_000 - inside - 1);
}

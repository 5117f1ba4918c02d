//! Integration tests: the histogram-refinement median engine on samples too
//! large to copy, checked against known order statistics.

use astrometry::numeric::{mad, median, order_statistic};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[test]
fn test_median_of_three_million_integers() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    // ── Step 1: Ordered sequence ──
    let values: Vec<u32> = (0..3_000_000).collect();
    let eps = 0.5 / 2f64.powi(32);
    let m = median(&values);
    println!("Median of 0..3e6: {m}");
    assert!((m - 1_499_999.5).abs() <= eps);

    // ── Step 2: Shuffled sequence, same result ──
    let mut shuffled = values.clone();
    shuffled.shuffle(&mut StdRng::seed_from_u64(3));
    assert!((median(&shuffled) - 1_499_999.5).abs() <= eps);

    // ── Step 3: Order statistics and MAD ──
    for k in [0, 1, 749_999, 2_000_000, 2_999_999] {
        assert_eq!(order_statistic(&shuffled, k), k as f64);
    }
    assert_eq!(order_statistic(&shuffled, 10_000_000), 2_999_999.0);
    let deviation = mad(&shuffled, 1_499_999.5);
    println!("MAD: {deviation}");
    assert!((deviation - 750_000.0).abs() <= 0.5);
}

#[test]
fn test_median_of_large_float_sample() {
    let n = 2_600_001;
    let mut values: Vec<f32> = (0..n).map(|i| i as f32 * 0.25 - 100_000.0).collect();
    values.shuffle(&mut StdRng::seed_from_u64(5));
    let expected = (n / 2) as f64 * 0.25 - 100_000.0;
    assert!((median(&values) - expected).abs() < 1e-3);
}

//! Integration tests: write an XPSD star database to disk, reopen it and
//! verify cone searches against brute-force counts.

use astrometry::star_database::{
    Compression, Metadata, NodeKind, SearchConfig, Star, StarDatabaseFile, StarDatabaseWriter,
    StarDatabaseWriterConfig, TreeProjectionKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 100 stars in each quadrant of the `[-2, 2]²` patch around `(0, 0)` plus
/// two stars on opposite corners, which pin the tree rectangle and the
/// magnitude range to `[0, 18]`.
fn catalog() -> Vec<Star> {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut stars = Vec::new();
    for (sx, sy) in [(-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)] {
        for _ in 0..100 {
            let x: f64 = sx * rng.random_range(0.01..1.99);
            let y: f64 = sy * rng.random_range(0.01..1.99);
            stars.push(Star {
                id: stars.len() as u64 + 1,
                ra: x.rem_euclid(360.0),
                dec: y,
                mag: rng.random_range(0.5f32..17.5),
                flags: rng.random_range(0..4),
            });
        }
    }
    stars.push(Star { id: 9001, ra: 358.0, dec: -2.0, mag: 0.0, flags: 0 });
    stars.push(Star { id: 9002, ra: 2.0, dec: 2.0, mag: 18.0, flags: 3 });
    stars
}

fn angular_distance(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (d1, d2) = (dec1.to_radians(), dec2.to_radians());
    let h = ((d2 - d1) / 2.0).sin().powi(2) + d1.cos() * d2.cos() * ((ra2 - ra1).to_radians() / 2.0).sin().powi(2);
    (2.0 * h.sqrt().asin()).to_degrees()
}

#[test]
fn test_cone_search_on_disk() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let stars = catalog();
    let path = std::env::temp_dir().join(format!("astrometry-cone-{}.xpsd", std::process::id()));

    // ── Step 1: Write ──
    let writer = StarDatabaseWriter::new(StarDatabaseWriterConfig {
        bucket_capacity: 150,
        metadata: Metadata {
            identifier: Some("TEST-4Q".into()),
            title: Some("Four quadrant test catalog".into()),
            ..Metadata::default()
        },
        ..StarDatabaseWriterConfig::default()
    });
    let statistics = writer.write_file(&stars, &path).expect("Failed to write database");
    println!(
        "Wrote {} sources in {} nodes ({} leaves)",
        statistics.total_sources, statistics.total_nodes, statistics.total_leaves
    );
    assert_eq!(statistics.total_sources, 402);
    assert_eq!(statistics.total_leaves, 4);
    assert_eq!(statistics.total_nodes, 5);
    assert_eq!(statistics.max_leaf_sources, 101);

    // ── Step 2: Reopen ──
    let mut db = StarDatabaseFile::open(&path).expect("Failed to open database");
    assert_eq!(db.metadata().identifier.as_deref(), Some("TEST-4Q"));
    assert!(db.metadata().creation_time.is_some());
    assert_eq!(db.trees().len(), 1);
    let tree = db.trees()[0];
    assert_eq!(tree.projection.kind, TreeProjectionKind::Equirectangular);
    assert_eq!((tree.projection.ra0, tree.projection.dec0), (0.0, 0.0));
    assert_eq!(db.data().magnitude_low, 0.0);
    assert_eq!(db.data().magnitude_high, 18.0);
    let leaves = db.nodes(0).iter().filter(|n| n.is_leaf()).count();
    assert_eq!(leaves, 4);
    assert!(matches!(db.nodes(0)[0].kind, NodeKind::Structural(_)));

    // ── Step 3: Cone searches with flag filters ──
    let truth = |config: &SearchConfig| {
        stars
            .iter()
            .filter(|s| angular_distance(0.0, 0.0, s.ra, s.dec) <= 1.0)
            .filter(|s| (0.0..=18.0).contains(&s.mag))
            .filter(|s| config.accepts_flags(s.flags))
            .count()
    };
    let mut config = SearchConfig::new(0.0, 0.0, 1.0);
    config.magnitude_low = 0.0;
    config.magnitude_high = 18.0;
    for (required, exclusion) in [(0, 0), (1, 0), (0, 2), (3, 0)] {
        config.required_flags = required;
        config.exclusion_flags = exclusion;
        let expected = truth(&config);
        let found = db.search_stars(config).expect("Cone search failed");
        println!(
            "required={required:#b} excluded={exclusion:#b}: {} stars (expected {expected}), {} leaves loaded",
            found.results.len(),
            found.leaves_loaded
        );
        assert_eq!(found.results.len(), expected);
        assert_eq!(found.excess_count, 0);
        assert!(found
            .results
            .iter()
            .all(|s| angular_distance(0.0, 0.0, s.ra, s.dec) <= 1.0 && config.accepts_flags(s.flags)));
    }

    // ── Step 4: Source limit ──
    config.required_flags = 0;
    config.exclusion_flags = 0;
    let total = truth(&config);
    assert!(total > 10);
    config.source_limit = 10;
    let limited = db.search_stars(config).unwrap();
    assert_eq!(limited.results.len(), 10);
    assert_eq!(limited.excess_count, total - 10);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_compression_codecs_agree() {
    let stars = catalog();
    let config = SearchConfig::new(359.5, 0.5, 1.5);
    let mut counts = Vec::new();
    for codec in [None, Some("lz4"), Some("lz4-hc+sh"), Some("zlib"), Some("zlib+sh")] {
        let compression = codec.map(|c| Compression::parse(c).unwrap());
        let writer = StarDatabaseWriter::new(StarDatabaseWriterConfig {
            bucket_capacity: 40,
            compression,
            ..StarDatabaseWriterConfig::default()
        });
        let mut bytes = Vec::new();
        writer.write(&stars, &mut bytes).unwrap();
        let mut db = StarDatabaseFile::from_reader(std::io::Cursor::new(bytes)).unwrap();
        let mut ids: Vec<u64> = db.search_stars(config).unwrap().results.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        counts.push(ids);
    }
    let expected = stars.iter().filter(|s| config.contains(s.ra, s.dec)).count();
    assert!(expected > 0);
    assert!(counts.iter().all(|ids| ids.len() == expected && *ids == counts[0]));
}

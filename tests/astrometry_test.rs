//! Integration tests: astrometric solutions built from FITS WCS keywords and
//! from serialized spline control points, checked through full
//! image -> celestial -> image round trips.

use astrometry::astrometry::CONTROL_POINTS_PROPERTY;
use astrometry::{
    AstrometricMetadata, FitsKeyword, KeywordSet, Point, PropertySet, SplineWorldTransformation,
    SplineWorldTransformationConfig, WorldTransformation, ZenithalKind, ZenithalProjection,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const WIDTH: usize = 1024;
const HEIGHT: usize = 1024;

fn wcs_keywords(crval1: f64) -> KeywordSet {
    [
        FitsKeyword::string("CTYPE1", "RA---TAN", ""),
        FitsKeyword::string("CTYPE2", "DEC--TAN", ""),
        FitsKeyword::new("CRPIX1", "512.5", ""),
        FitsKeyword::new("CRPIX2", "512.5", ""),
        FitsKeyword::number("CRVAL1", crval1, 12, ""),
        FitsKeyword::new("CRVAL2", "0.0", ""),
        FitsKeyword::new("CD1_1", "-0.0002777778", ""),
        FitsKeyword::new("CD1_2", "0.0", ""),
        FitsKeyword::new("CD2_1", "0.0", ""),
        FitsKeyword::new("CD2_2", "0.0002777778", ""),
    ]
    .into_iter()
    .collect()
}

fn linear_solution(crval1: f64) -> AstrometricMetadata {
    AstrometricMetadata::from_bundle(&PropertySet::new(), &wcs_keywords(crval1), &[], WIDTH, HEIGHT)
        .expect("Failed to build linear solution")
}

/// FITS pixel `(i, j)` sits at image `(i - 0.5, height + 0.5 - j)`.
#[test]
fn test_linear_solution_from_wcs() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let metadata = linear_solution(180.0);
    assert!(metadata.is_valid());

    // ── Step 1: Reference pixel maps to CRVAL ──
    let center = metadata.image_to_celestial(Point::new(512.0, 512.0)).unwrap();
    println!("Reference pixel: RA={:.10} Dec={:.10}", center.x, center.y);
    assert!((center.x - 180.0).abs() < 1e-9);
    assert!(center.y.abs() < 1e-9);

    // ── Step 2: FITS pixel (1, 1) ──
    let corner = metadata.image_to_celestial(Point::new(0.5, 1023.5)).unwrap();
    println!("FITS (1,1): RA={:.6} Dec={:.6}", corner.x, corner.y);
    assert!((corner.x - 180.1421).abs() < 1e-3, "RA {}", corner.x);
    assert!((corner.y + 0.1421).abs() < 1e-3, "Dec {}", corner.y);

    // ── Step 3: Inverse and reporting ──
    let back = metadata.celestial_to_image(corner).unwrap();
    assert!(back.distance_to(Point::new(0.5, 1023.5)) < 1e-6);
    metadata.validate(0.01).unwrap();
    assert!((metadata.resolution() * 3600.0 - 1.0).abs() < 1e-4);
    let (rotation, flipped) = metadata.rotation().unwrap();
    println!("Rotation {rotation:.4}°, flipped={flipped}");
    assert!(rotation.abs() < 1e-6 || (rotation.abs() - 180.0).abs() < 1e-6);

    let radius = metadata.search_radius().unwrap();
    assert!((radius - 0.2011).abs() < 1e-3, "search radius {radius}");
}

#[test]
fn test_right_ascension_wraps_at_zero() {
    let metadata = linear_solution(0.05);
    // Left half of the image lies at RA > 0, the right edge crosses into 359.9x.
    for x in [0.0, 256.0, 900.0, 1024.0] {
        let p = Point::new(x, 512.0);
        let wrapped = metadata.image_to_celestial(p).unwrap();
        let raw = metadata.raw_image_to_celestial(p).unwrap();
        assert!((0.0..360.0).contains(&wrapped.x), "RA {} at x={x}", wrapped.x);
        let d = (raw.x - wrapped.x).rem_euclid(360.0);
        assert!(d < 1e-9 || d > 360.0 - 1e-9);
        assert!((raw.y - wrapped.y).abs() < 1e-12);
    }
    let east = metadata.image_to_celestial(Point::new(0.0, 512.0)).unwrap();
    let west = metadata.image_to_celestial(Point::new(1024.0, 512.0)).unwrap();
    assert!(east.x < 1.0);
    assert!(west.x > 359.0);

    // Raw coordinates stay continuous across the boundary.
    let raw_west = metadata.raw_image_to_celestial(Point::new(1024.0, 512.0)).unwrap();
    let raw_east = metadata.raw_image_to_celestial(Point::new(0.0, 512.0)).unwrap();
    let span = (raw_east.x - raw_west.x).abs();
    assert!(span < 1.0 || (span - 360.0).abs() < 1.0);
}

/// Spline solution from 500 control points whose image positions carry
/// 1-pixel Gaussian perturbations, saved and rebuilt from keywords plus
/// serialized control points.
#[test]
fn test_spline_solution_round_trip() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let linear = linear_solution(180.0);
    let image_to_native = linear.transformation().unwrap().approximate_linear_transform();

    // ── Step 1: Control points ──
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let image: Vec<Point> = (0..500)
        .map(|_| Point::new(rng.random_range(0.0..1024.0), rng.random_range(0.0..1024.0)))
        .collect();
    let native: Vec<Point> = image
        .iter()
        .map(|&p| {
            let perturbed = p + Point::new(noise.sample(&mut rng), noise.sample(&mut rng));
            image_to_native.transform(perturbed)
        })
        .collect();

    let config = SplineWorldTransformationConfig::default();
    let spline = SplineWorldTransformation::new(&native, &image, None, &config).expect("Failed to build splines");
    assert_eq!(spline.control_point_count(), 500);

    let projection = ZenithalProjection::new(ZenithalKind::Gnomonic, 180.0, 0.0, None).unwrap();
    let solution =
        AstrometricMetadata::new(Box::new(projection), WorldTransformation::from(spline), WIDTH, HEIGHT).unwrap();
    solution.validate(0.01).unwrap();

    // ── Step 2: Save to keywords and properties ──
    let mut keywords = wcs_keywords(180.0);
    let mut properties = PropertySet::new();
    solution.write(&mut keywords, &mut properties).unwrap();
    let bytes = properties
        .bytes(CONTROL_POINTS_PROPERTY)
        .expect("control points property")
        .to_vec();
    println!("Serialized control points: {} bytes", bytes.len());
    assert!(keywords.get("REFSPLIN").and_then(FitsKeyword::as_bool).unwrap_or(false));

    // ── Step 3: Rebuild and verify ──
    let restored = AstrometricMetadata::from_bundle(&properties, &keywords, &bytes, WIDTH, HEIGHT)
        .expect("Failed to restore spline solution");
    assert!(restored.transformation().unwrap().is_spline());
    restored.validate(0.01).unwrap();
    for (i, delta) in restored.verify().unwrap().iter().enumerate() {
        println!("Check point {i}: dx={:.2e} dy={:.2e}", delta.x, delta.y);
        assert!(delta.x.abs() < 0.01 && delta.y.abs() < 0.01);
    }

    // Both solutions agree on the sky.
    for p in [Point::new(100.0, 900.0), Point::new(700.0, 300.0)] {
        let a = solution.image_to_celestial(p).unwrap();
        let b = restored.image_to_celestial(p).unwrap();
        assert!((a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6);
    }

    // ── Step 4: Description ──
    let description = restored.description().unwrap();
    assert!(!description.reference_matrix.is_empty());
    assert_eq!(description.reference_matrix.lines().count(), 2);
    for row in description.reference_matrix.lines() {
        assert_eq!(row.split_whitespace().count(), 3);
    }
    assert_eq!(description.transformation_type, "Thin plate spline");
    assert!(description.spline_residuals.is_some());
    println!("{}", restored.summary().unwrap());
}

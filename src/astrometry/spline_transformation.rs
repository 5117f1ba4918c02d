//! Surface spline world transformation.
//!
//! Two point surface splines model the distortion of an astrometric solution:
//! one maps native plane coordinates to image coordinates, the other maps
//! image coordinates back to the native plane. Both are generated from the
//! same list of control-point pairs, optionally simplified first, and may be
//! replaced at evaluation time by bicubic grid interpolations for speed.

use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};
use crate::interpolation::PointGridInterpolation;
use crate::linear_transformation::LinearTransformation;
use crate::spline::{
    RecursivePointSurfaceSpline, RecursiveSplineConfig, SurfaceSimplifier, SurfaceSimplifierConfig,
};

/// Version tag of the serialized control-point archive.
const CONTROL_POINTS_VERSION: u32 = 1;

/// Border samples per rectangle side when bounding the native grid domain.
const GRID_BORDER_SAMPLES: usize = 32;

/// Newton refinement of [`SplineWorldTransformation::inverse`]: image-space
/// tolerance in pixels and iteration limit.
const INVERSE_TOLERANCE: f64 = 1.0e-6;
const INVERSE_MAX_ITERATIONS: usize = 8;

/// Generation parameters of a [`SplineWorldTransformation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineWorldTransformationConfig {
    /// Spline derivative order. Default 2.
    pub order: usize,
    /// Smoothing factor. Default 0.025.
    pub smoothness: f64,
    /// Reduce control points with a [`SurfaceSimplifier`] before generation.
    /// Weights are ignored when enabled. Default true.
    pub enable_simplifier: bool,
    /// Simplifier tolerance in pixels. Default 0.25.
    pub simplifier_tolerance: f64,
    /// Simplifier outlier rejection fraction. Default 0.10.
    pub simplifier_reject_fraction: f64,
    /// Control points beyond this count are discarded. Default 2100.
    pub max_spline_points: usize,
    /// Partitioning of large control-point sets. The `spline` member is
    /// overridden by `order` and `smoothness`.
    pub recursive: RecursiveSplineConfig,
}

impl Default for SplineWorldTransformationConfig {
    fn default() -> Self {
        Self {
            order: 2,
            smoothness: 0.025,
            enable_simplifier: true,
            simplifier_tolerance: 0.25,
            simplifier_reject_fraction: 0.10,
            max_spline_points: 2100,
            recursive: RecursiveSplineConfig::default(),
        }
    }
}

impl SplineWorldTransformationConfig {
    fn recursive_config(&self) -> RecursiveSplineConfig {
        let mut config = self.recursive;
        config.spline.order = self.order;
        config.spline.smoothness = self.smoothness;
        config
    }
}

// ── Serialization ───────────────────────────────────────────────────────────

/// Archived form of a spline world transformation: everything needed to
/// regenerate both splines.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SplineControlPoints {
    pub version: u32,
    /// Native plane coordinates `(x, y)`.
    pub native: Vec<[f64; 2]>,
    /// Image coordinates `(x, y)`.
    pub image: Vec<[f64; 2]>,
    pub order: u32,
    pub smoothness: f64,
    /// Empty when no weights were given.
    pub weights: Vec<f64>,
    pub enable_simplifier: bool,
    pub simplifier_tolerance: f64,
    pub simplifier_reject_fraction: f64,
    pub truncated: bool,
}

impl SplineControlPoints {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::CorruptedData(format!("control point serialization failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        let points = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Parse(format!("invalid serialized control points: {e}")))?;
        if points.version != CONTROL_POINTS_VERSION {
            return Err(Error::Parse(format!(
                "unsupported control point archive version {}",
                points.version
            )));
        }
        if points.native.len() != points.image.len() {
            return Err(Error::IncompatibleInputs(format!(
                "{} native control points paired with {} image control points",
                points.native.len(),
                points.image.len()
            )));
        }
        Ok(points)
    }
}

fn to_points(v: &[[f64; 2]]) -> Vec<Point> {
    v.iter().map(|&[x, y]| Point::new(x, y)).collect()
}

fn to_pairs(v: &[Point]) -> Vec<[f64; 2]> {
    v.iter().map(|p| [p.x, p.y]).collect()
}

fn max_abs(p: Point) -> f64 {
    p.x.abs().max(p.y.abs())
}

// ── The transformation ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SplineWorldTransformation {
    config: SplineWorldTransformationConfig,
    native: Vec<Point>,
    image: Vec<Point>,
    weights: Vec<f64>,
    truncated: bool,
    world_to_image: RecursivePointSurfaceSpline,
    image_to_world: RecursivePointSurfaceSpline,
    linear_iw: LinearTransformation,
    grid_wi: Option<PointGridInterpolation>,
    grid_iw: Option<PointGridInterpolation>,
}

/// Keep at most `max` pairs, sampled evenly over the input order.
fn truncate(p1: &mut Vec<Point>, p2: &mut Vec<Point>, max: usize) -> bool {
    let n = p1.len();
    if max == 0 || n <= max {
        return false;
    }
    let keep: Vec<usize> = (0..max).map(|i| i * n / max).collect();
    *p1 = keep.iter().map(|&i| p1[i]).collect();
    *p2 = keep.iter().map(|&i| p2[i]).collect();
    true
}

impl SplineWorldTransformation {
    /// Generate the transformation from control-point pairs
    /// `native[i] <-> image[i]`.
    pub fn new(
        native: &[Point],
        image: &[Point],
        weights: Option<&[f64]>,
        config: &SplineWorldTransformationConfig,
    ) -> Result<Self> {
        Self::build(native, image, weights, config, None, false)
    }

    /// Regenerate a transformation from serialized control points. A known
    /// approximate linear transformation (image to native) saves refitting it.
    pub fn from_serialized(
        bytes: &[u8],
        linear: Option<LinearTransformation>,
        recursive: RecursiveSplineConfig,
    ) -> Result<Self> {
        let points = SplineControlPoints::from_bytes(bytes)?;
        let config = SplineWorldTransformationConfig {
            order: points.order as usize,
            smoothness: points.smoothness,
            enable_simplifier: points.enable_simplifier,
            simplifier_tolerance: points.simplifier_tolerance,
            simplifier_reject_fraction: points.simplifier_reject_fraction,
            recursive,
            ..Default::default()
        };
        let weights = (!points.weights.is_empty()).then_some(points.weights.as_slice());
        Self::build(
            &to_points(&points.native),
            &to_points(&points.image),
            weights,
            &config,
            linear,
            points.truncated,
        )
    }

    fn build(
        native: &[Point],
        image: &[Point],
        weights: Option<&[f64]>,
        config: &SplineWorldTransformationConfig,
        linear: Option<LinearTransformation>,
        truncated: bool,
    ) -> Result<Self> {
        if native.len() != image.len() {
            return Err(Error::IncompatibleInputs(format!(
                "{} native control points paired with {} image control points",
                native.len(),
                image.len()
            )));
        }
        if let Some(w) = weights {
            if w.len() != native.len() {
                return Err(Error::IncompatibleInputs(format!(
                    "{} weights supplied for {} control points",
                    w.len(),
                    native.len()
                )));
            }
        }
        if native.len() < 3 {
            return Err(Error::InsufficientNodes {
                found: native.len(),
                required: 3,
            });
        }

        let linear_iw = match linear {
            Some(l) => l,
            None => LinearTransformation::fit(image, native)?,
        };
        let spline_config = config.recursive_config();
        let mut truncated = truncated;

        // The image to native spline interpolates the forward spline's
        // outputs, so both directions describe the same smoothed surface.
        let mut inverse_config = spline_config;
        inverse_config.spline.smoothness = 0.0;

        let (world_to_image, image_to_world) = if config.enable_simplifier {
            // Tolerances are given in pixels; scale to native units for the
            // image to native direction.
            let scale = linear_iw.determinant().abs().sqrt();
            let wi = SurfaceSimplifier::new(SurfaceSimplifierConfig {
                tolerance: config.simplifier_tolerance,
                reject_fraction: config.simplifier_reject_fraction,
                ..Default::default()
            })
            .simplify(native, image);
            let iw = SurfaceSimplifier::new(SurfaceSimplifierConfig {
                tolerance: config.simplifier_tolerance * scale,
                reject_fraction: config.simplifier_reject_fraction,
                ..Default::default()
            })
            .simplify(image, native);
            debug!(
                "Simplified control points: {} -> {} (W->I, {} rejected), {} (I->W, {} rejected)",
                native.len(),
                wi.p1.len(),
                wi.rejected,
                iw.p1.len(),
                iw.rejected
            );

            let (mut wi1, mut wi2) = (wi.p1, wi.p2);
            let (mut iw1, mut iw2) = (iw.p1, iw.p2);
            truncated |= truncate(&mut wi1, &mut wi2, config.max_spline_points);
            truncated |= truncate(&mut iw1, &mut iw2, config.max_spline_points);
            let world_to_image = RecursivePointSurfaceSpline::fit(&wi1, &wi2, None, &spline_config)?;
            let nodes: Vec<Point> = iw2.iter().map(|&p| world_to_image.evaluate(p)).collect();
            let image_to_world = RecursivePointSurfaceSpline::fit(&nodes, &iw2, None, &inverse_config)?;
            (world_to_image, image_to_world)
        } else {
            let (mut p1, mut p2) = (native.to_vec(), image.to_vec());
            let mut w = weights.map(<[f64]>::to_vec);
            let n = p1.len();
            if truncate(&mut p1, &mut p2, config.max_spline_points) {
                truncated = true;
                if let Some(w) = w.as_mut() {
                    let max = config.max_spline_points;
                    let sampled: Vec<f64> = (0..max).map(|i| w[i * n / max]).collect();
                    *w = sampled;
                }
            }
            let world_to_image = RecursivePointSurfaceSpline::fit(&p1, &p2, w.as_deref(), &spline_config)?;
            let nodes: Vec<Point> = p1.iter().map(|&p| world_to_image.evaluate(p)).collect();
            let image_to_world = RecursivePointSurfaceSpline::fit(&nodes, &p1, None, &inverse_config)?;
            (world_to_image, image_to_world)
        };
        if truncated {
            warn!(
                "Spline world transformation: control points truncated to {}",
                config.max_spline_points
            );
        }
        info!(
            "Spline world transformation: {} control points, order {}, smoothness {}",
            native.len(),
            config.order,
            config.smoothness
        );

        Ok(Self {
            config: *config,
            native: native.to_vec(),
            image: image.to_vec(),
            weights: weights.map(<[f64]>::to_vec).unwrap_or_default(),
            truncated,
            world_to_image,
            image_to_world,
            linear_iw,
            grid_wi: None,
            grid_iw: None,
        })
    }

    pub fn config(&self) -> &SplineWorldTransformationConfig {
        &self.config
    }

    pub fn native_control_points(&self) -> &[Point] {
        &self.native
    }

    pub fn image_control_points(&self) -> &[Point] {
        &self.image
    }

    pub fn control_point_count(&self) -> usize {
        self.native.len()
    }

    /// Control points were discarded to respect the spline size limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Native plane to image coordinates.
    pub fn direct(&self, native: Point) -> Point {
        match &self.grid_wi {
            Some(grid) if grid.includes(native) => grid.evaluate(native),
            _ => self.world_to_image.evaluate(native),
        }
    }

    /// Image to native plane coordinates.
    ///
    /// The image to native spline gives the starting point; Newton steps on
    /// [`direct`](Self::direct), with the approximate linear transformation
    /// standing in for the inverse Jacobian, then close the round trip.
    pub fn inverse(&self, image: Point) -> Point {
        let mut native = match &self.grid_iw {
            Some(grid) if grid.includes(image) => grid.evaluate(image),
            _ => self.image_to_world.evaluate(image),
        };
        let mut residual = image - self.direct(native);
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let error = max_abs(residual);
            if !(error > INVERSE_TOLERANCE) {
                break;
            }
            let next = native + self.linear_iw.transform_vector(residual);
            let next_residual = image - self.direct(next);
            if !(max_abs(next_residual) < error) {
                break;
            }
            native = next;
            residual = next_residual;
        }
        native
    }

    /// Least-squares affine approximation, image to native.
    pub fn approximate_linear_transform(&self) -> &LinearTransformation {
        &self.linear_iw
    }

    /// Sample both splines on grids: image to native over `rect` with spacing
    /// `delta` pixels, native to image over the native bounding box of `rect`
    /// with the equivalent native spacing.
    pub fn initialize_grid_interpolations(&mut self, rect: Rect, delta: f64) -> Result<()> {
        let iw = &self.image_to_world;
        let grid_iw = PointGridInterpolation::new(rect, delta, |p| iw.evaluate(p))?;

        let border: Vec<Point> = (0..=GRID_BORDER_SAMPLES)
            .flat_map(|i| {
                let t = i as f64 / GRID_BORDER_SAMPLES as f64;
                let x = rect.x0 + t * rect.width();
                let y = rect.y0 + t * rect.height();
                [
                    Point::new(x, rect.y0),
                    Point::new(x, rect.y1),
                    Point::new(rect.x0, y),
                    Point::new(rect.x1, y),
                ]
            })
            .map(|p| iw.evaluate(p))
            .collect();
        let native_rect = Rect::bounding(&border).ok_or(Error::EmptyDomain(
            "native grid interpolation domain".into(),
        ))?;
        let resolution = self.linear_iw.mean_row_norm();
        let wi = &self.world_to_image;
        let grid_wi = PointGridInterpolation::new(native_rect, delta * resolution, |p| wi.evaluate(p))?;

        debug!(
            "Grid interpolations: image {:?} nodes, native {:?} nodes",
            grid_iw.dimensions(),
            grid_wi.dimensions()
        );
        self.grid_iw = Some(grid_iw);
        self.grid_wi = Some(grid_wi);
        Ok(())
    }

    pub fn has_grid_interpolations(&self) -> bool {
        self.grid_iw.is_some() && self.grid_wi.is_some()
    }

    pub fn clear_grid_interpolations(&mut self) {
        self.grid_iw = None;
        self.grid_wi = None;
    }

    pub fn control_points(&self) -> SplineControlPoints {
        SplineControlPoints {
            version: CONTROL_POINTS_VERSION,
            native: to_pairs(&self.native),
            image: to_pairs(&self.image),
            order: self.config.order as u32,
            smoothness: self.config.smoothness,
            weights: self.weights.clone(),
            enable_simplifier: self.config.enable_simplifier,
            simplifier_tolerance: self.config.simplifier_tolerance,
            simplifier_reject_fraction: self.config.simplifier_reject_fraction,
            truncated: self.truncated,
        }
    }

    pub fn serialize_control_points(&self) -> Result<Vec<u8>> {
        self.control_points().to_bytes()
    }

    /// Image-space round-trip residuals at the image control points.
    pub fn residuals(&self) -> Vec<Point> {
        self.image
            .iter()
            .map(|&p| self.direct(self.inverse(p)) - p)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 arcsec/px affine plus a gentle quadratic distortion.
    fn control_points() -> (Vec<Point>, Vec<Point>) {
        let linear = LinearTransformation::new(-2.8e-4, 0.0, 0.14, 0.0, -2.8e-4, 0.14);
        let mut native = Vec::new();
        let mut image = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                let p = Point::new(12.5 + 50.0 * i as f64, 12.5 + 50.0 * j as f64);
                let d = Point::new(
                    0.5 * ((p.x - 500.0) / 500.0).powi(2),
                    -0.4 * (p.x - 500.0) * (p.y - 500.0) / 250_000.0,
                );
                image.push(p);
                native.push(linear.transform(p + d));
            }
        }
        (native, image)
    }

    fn config() -> SplineWorldTransformationConfig {
        SplineWorldTransformationConfig {
            smoothness: 0.0,
            enable_simplifier: false,
            ..Default::default()
        }
    }

    #[test]
    fn splines_are_mutually_inverse() {
        let (native, image) = control_points();
        let t = SplineWorldTransformation::new(&native, &image, None, &config()).unwrap();
        for p in [Point::new(500.0, 500.0), Point::new(37.0, 912.0), Point::new(800.5, 120.25)] {
            let q = t.direct(t.inverse(p));
            assert!((q - p).norm() < 1e-3, "{p:?} -> {q:?}");
        }
        assert!(!t.is_truncated());
        assert!(t.residuals().iter().all(|r| r.norm() < 1e-6));
    }

    #[test]
    fn serialized_control_points_regenerate_the_transformation() {
        let (native, image) = control_points();
        let t = SplineWorldTransformation::new(&native, &image, None, &config()).unwrap();
        let bytes = t.serialize_control_points().unwrap();
        let u = SplineWorldTransformation::from_serialized(
            &bytes,
            Some(*t.approximate_linear_transform()),
            RecursiveSplineConfig::default(),
        )
        .unwrap();
        assert_eq!(u.control_point_count(), 400);
        let p = Point::new(333.0, 444.0);
        assert!((u.inverse(p) - t.inverse(p)).norm() < 1e-12);
        assert!(SplineControlPoints::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn truncation_is_recorded() {
        let (native, image) = control_points();
        let config = SplineWorldTransformationConfig {
            max_spline_points: 100,
            ..config()
        };
        let t = SplineWorldTransformation::new(&native, &image, None, &config).unwrap();
        assert!(t.is_truncated());
        assert!(t.control_points().truncated);
    }

    #[test]
    fn simplifier_keeps_accuracy() {
        let (native, image) = control_points();
        let config = SplineWorldTransformationConfig {
            smoothness: 0.0,
            ..Default::default()
        };
        let t = SplineWorldTransformation::new(&native, &image, None, &config).unwrap();
        let exact = SplineWorldTransformation::new(&native, &image, None, &self::config()).unwrap();
        let p = Point::new(480.0, 520.0);
        // Native units are ~2.8e-4 deg/px.
        assert!((t.inverse(p) - exact.inverse(p)).norm() < 2.8e-4);
    }

    #[test]
    fn grid_interpolation_matches_splines() {
        let (native, image) = control_points();
        let mut t = SplineWorldTransformation::new(&native, &image, None, &config()).unwrap();
        let direct = t.clone();
        t.initialize_grid_interpolations(Rect::new(0.0, 0.0, 1000.0, 1000.0), 16.0)
            .unwrap();
        assert!(t.has_grid_interpolations());
        let p = Point::new(401.3, 612.9);
        let scale = 2.8e-4;
        assert!((t.inverse(p) - direct.inverse(p)).norm() < 0.01 * scale);
        let w = direct.inverse(p);
        assert!((t.direct(w) - direct.direct(w)).norm() < 0.01);
        t.clear_grid_interpolations();
        assert!((t.inverse(p) - direct.inverse(p)).norm() == 0.0);
    }

    #[test]
    fn noisy_control_points_close_the_round_trip() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use rand_distr::{Distribution, Normal};

        let linear = LinearTransformation::new(-2.7777778e-4, 0.0, 0.1422, 0.0, -2.7777778e-4, 0.1422);
        let noise = Normal::new(0.0, 1.0).unwrap();
        for seed in 1..=3 {
            let mut rng = StdRng::seed_from_u64(seed);
            let image: Vec<Point> = (0..500)
                .map(|_| Point::new(rng.random_range(0.0..1024.0), rng.random_range(0.0..1024.0)))
                .collect();
            let native: Vec<Point> = image
                .iter()
                .map(|&p| linear.transform(p + Point::new(noise.sample(&mut rng), noise.sample(&mut rng))))
                .collect();
            let t = SplineWorldTransformation::new(&native, &image, None, &Default::default()).unwrap();
            for p in Rect::new(0.0, 0.0, 1024.0, 1024.0)
                .corners()
                .into_iter()
                .chain([Point::new(512.0, 512.0)])
            {
                let delta = t.direct(t.inverse(p)) - p;
                assert!(max_abs(delta) < 0.01, "seed {seed}: {p:?} round trip {delta:?}");
            }
        }
    }

    #[test]
    fn mismatched_inputs_fail() {
        let (native, image) = control_points();
        assert!(matches!(
            SplineWorldTransformation::new(&native[1..], &image, None, &config()),
            Err(Error::IncompatibleInputs(_))
        ));
    }
}

//! Astrometric solution of an image.
//!
//! [`AstrometricMetadata`] owns a [`Projection`] and a [`WorldTransformation`]
//! and converts between image coordinates and celestial coordinates:
//!
//! ```text
//! image --WorldTransformation::inverse--> native --Projection::inverse--> (ra, dec)
//! (ra, dec) --Projection::direct--> native --WorldTransformation::direct--> image
//! ```
//!
//! It also carries the observation metadata that accompanies a solution and
//! reads/writes all of it as FITS keywords and image properties.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geometry::{Point, Rect};
use crate::keywords::{
    format_fits_time, format_sexagesimal, FitsKeyword, KeywordSet, PropertySet, PropertyValue,
};
use crate::linear_transformation::LinearTransformation;
use crate::spline::RecursiveSplineConfig;

use super::projection::{create_projection, Projection};
use super::spline_transformation::SplineWorldTransformation;
use super::wcs::{normalize_longitude, WcsKeywords};
use super::world_transformation::{LinearWorldTransformation, WorldTransformation};

/// Property holding the serialized spline control points.
pub const CONTROL_POINTS_PROPERTY: &str = "Transformation_ImageToProjection";

/// Arcseconds per radian, times 1e-3 to convert micrometers to millimeters.
const FOCAL_FACTOR: f64 = 206.264_806_247;

/// Keywords rewritten by [`AstrometricMetadata::write`].
const BASIC_KEYWORDS: &[&str] = &[
    "RA", "DEC", "OBJCTRA", "OBJCTDEC", "DATE-OBS", "DATE-BEG", "DATE-END", "TIMESYS", "OBSGEO-L",
    "OBSGEO-B", "OBSGEO-H", "LONG-OBS", "LAT-OBS", "ALT-OBS", "SITELONG", "SITELAT", "SITEELEV",
    "FOCALLEN", "XPIXSZ", "YPIXSZ", "REFSPLIN", "PV1_1", "PV1_2", "PV1_3", "PV1_4",
];

/// Great-circle distance between two `(ra, dec)` points, in degrees.
pub fn angular_distance(a: Point, b: Point) -> f64 {
    let (ra1, dec1) = (a.x.to_radians(), a.y.to_radians());
    let (ra2, dec2) = (b.x.to_radians(), b.y.to_radians());
    let h = ((dec2 - dec1) / 2.0).sin().powi(2)
        + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}

/// Rotation angle in degrees, `(-180, 180]`, and mirror flag of an image to
/// native affine transformation.
pub fn rotation_of(a: &LinearTransformation) -> (f64, bool) {
    let det = a.a01 * a.a10 - a.a00 * a.a11;
    let mut rot = (a.a00 + a.a01).atan2(a.a10 + a.a11).to_degrees() + 135.0;
    if det > 0.0 {
        rot = -90.0 - rot;
    }
    let mut rot = rot.rem_euclid(360.0);
    if rot > 180.0 {
        rot -= 360.0;
    }
    (rot, det > 0.0)
}

/// Human-readable facts about a solution, computed once on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    /// Image to native affine matrix, two rows of three coefficients.
    pub reference_matrix: String,
    pub transformation_type: String,
    pub projection_name: String,
    /// Projection reference point `(ra, dec)`.
    pub projection_origin: Point,
    /// Arcseconds per pixel.
    pub resolution: f64,
    pub rotation: f64,
    pub flipped: bool,
    /// Horizontal and vertical field of view in degrees.
    pub field_of_view: (f64, f64),
    pub center: Option<Point>,
    /// Celestial coordinates of the corners (0,0), (w,0), (0,h), (w,h).
    pub corners: [Option<Point>; 4],
    /// Round-trip residuals at the corners, in pixels. Spline solutions only.
    pub spline_residuals: Option<[Point; 4]>,
    pub observation_start: Option<DateTime<Utc>>,
    pub observation_end: Option<DateTime<Utc>>,
    /// Longitude, latitude (degrees) and altitude (meters).
    pub location: Option<(f64, f64, Option<f64>)>,
    /// Millimeters.
    pub focal_length: Option<f64>,
    /// Micrometers.
    pub pixel_size: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AstrometricMetadata {
    projection: Option<Box<dyn Projection>>,
    transformation: Option<WorldTransformation>,
    width: usize,
    height: usize,
    /// Degrees per pixel.
    resolution: f64,
    pixel_size: Option<f64>,
    focal_length: Option<f64>,
    observation_start: Option<DateTime<Utc>>,
    observation_end: Option<DateTime<Utc>>,
    longitude: Option<f64>,
    latitude: Option<f64>,
    altitude: Option<f64>,
    reference_system: Option<String>,
    equinox: Option<f64>,
    description: OnceLock<Description>,
}

impl AstrometricMetadata {
    pub fn new(
        projection: Box<dyn Projection>,
        transformation: WorldTransformation,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyDomain(format!(
                "astrometric solution for a {width}x{height} image"
            )));
        }
        let resolution = transformation.approximate_linear_transform().mean_row_norm();
        Ok(Self {
            projection: Some(projection),
            transformation: Some(transformation),
            width,
            height,
            resolution,
            reference_system: Some("ICRS".to_string()),
            ..Default::default()
        })
    }

    /// Rebuild a solution from image properties, FITS keywords and optional
    /// serialized spline control points. Properties override keywords.
    pub fn from_bundle(
        properties: &PropertySet,
        keywords: &KeywordSet,
        control_points: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Self> {
        let wcs = WcsKeywords::read(keywords, properties);
        if !wcs.is_valid() {
            return Err(Error::Parse(
                "missing mandatory WCS keywords (CTYPE1/2, CRPIX1/2, CRVAL1/2)".into(),
            ));
        }
        let projection = create_projection(&wcs)?;
        let linear = wcs.image_to_world(height as f64)?;
        let transformation = if control_points.is_empty() {
            WorldTransformation::from(LinearWorldTransformation::new(linear)?)
        } else {
            WorldTransformation::from(SplineWorldTransformation::from_serialized(
                control_points,
                Some(linear),
                RecursiveSplineConfig::default(),
            )?)
        };
        if wcs.ref_spline != transformation.is_spline() {
            warn!("REFSPLIN keyword disagrees with the available control points");
        }

        let mut metadata = Self::new(projection, transformation, width, height)?;
        metadata.pixel_size = wcs.xpixsz;
        metadata.focal_length = wcs.focal_length;
        metadata.update_focal_length();
        metadata.observation_start = wcs.date_obs;
        metadata.observation_end = wcs.date_end;
        metadata.longitude = wcs.longitude;
        metadata.latitude = wcs.latitude;
        metadata.altitude = wcs.altitude;
        if let Some(s) = wcs.radesys {
            metadata.reference_system = Some(s);
        }
        metadata.equinox = wcs.equinox;
        debug!(
            "Astrometric solution: {}, {:.3} arcsec/px",
            metadata.projection_name(),
            metadata.resolution * 3600.0
        );
        Ok(metadata)
    }

    pub fn is_valid(&self) -> bool {
        self.projection.is_some()
            && self.transformation.as_ref().is_some_and(|t| !t.is_empty())
            && self.width > 0
            && self.height > 0
    }

    fn parts(&self) -> Result<(&dyn Projection, &WorldTransformation)> {
        match (&self.projection, &self.transformation) {
            (Some(p), Some(t)) => Ok((&**p, t)),
            _ => Err(Error::NotInitialized("astrometric solution")),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }

    pub fn projection(&self) -> Option<&dyn Projection> {
        self.projection.as_deref()
    }

    pub fn transformation(&self) -> Option<&WorldTransformation> {
        self.transformation.as_ref()
    }

    pub fn transformation_mut(&mut self) -> Option<&mut WorldTransformation> {
        self.description = OnceLock::new();
        self.transformation.as_mut()
    }

    fn projection_name(&self) -> &'static str {
        self.projection.as_ref().map_or("none", |p| p.name())
    }

    /// Degrees per pixel.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Micrometers.
    pub fn pixel_size(&self) -> Option<f64> {
        self.pixel_size
    }

    /// Millimeters.
    pub fn focal_length(&self) -> Option<f64> {
        self.focal_length
    }

    pub fn observation_start(&self) -> Option<DateTime<Utc>> {
        self.observation_start
    }

    pub fn observation_end(&self) -> Option<DateTime<Utc>> {
        self.observation_end
    }

    /// Longitude, latitude and altitude of the observer.
    pub fn geodetic_coordinates(&self) -> Option<(f64, f64, Option<f64>)> {
        Some((self.longitude?, self.latitude?, self.altitude))
    }

    pub fn reference_system(&self) -> Option<&str> {
        self.reference_system.as_deref()
    }

    pub fn equinox(&self) -> Option<f64> {
        self.equinox
    }

    // ── Setters ─────────────────────────────────────────────────────────────

    pub fn set_geodetic_coordinates(&mut self, longitude: f64, latitude: f64, altitude: Option<f64>) -> Result<()> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::OutOfRange {
                what: "geodetic latitude",
                value: latitude,
            });
        }
        if !longitude.is_finite() {
            return Err(Error::OutOfRange {
                what: "geodetic longitude",
                value: longitude,
            });
        }
        self.longitude = Some(normalize_longitude(longitude));
        self.latitude = Some(latitude);
        self.altitude = altitude;
        self.description = OnceLock::new();
        Ok(())
    }

    pub fn clear_geodetic_coordinates(&mut self) {
        self.longitude = None;
        self.latitude = None;
        self.altitude = None;
        self.description = OnceLock::new();
    }

    /// Set the pixel size in micrometers; the focal length follows from the
    /// resolution.
    pub fn set_pixel_size(&mut self, pixel_size: f64) -> Result<()> {
        if !(pixel_size > 0.0) {
            return Err(Error::OutOfRange {
                what: "pixel size",
                value: pixel_size,
            });
        }
        self.pixel_size = Some(pixel_size);
        self.update_focal_length();
        self.description = OnceLock::new();
        Ok(())
    }

    pub fn set_focal_length(&mut self, focal_length: f64) -> Result<()> {
        if !(focal_length > 0.0) {
            return Err(Error::OutOfRange {
                what: "focal length",
                value: focal_length,
            });
        }
        self.focal_length = Some(focal_length);
        self.description = OnceLock::new();
        Ok(())
    }

    pub fn set_observation_times(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        self.observation_start = start;
        self.observation_end = end;
        self.description = OnceLock::new();
    }

    pub fn set_reference_system(&mut self, name: &str, equinox: Option<f64>) {
        self.reference_system = Some(name.trim().to_uppercase());
        self.equinox = equinox;
        self.description = OnceLock::new();
    }

    fn update_focal_length(&mut self) {
        if let Some(px) = self.pixel_size {
            if self.resolution > 0.0 {
                self.focal_length = Some(FOCAL_FACTOR * px / (self.resolution * 3600.0));
            }
        }
    }

    /// Fail unless the solution was computed for a `width` x `height` image.
    pub fn check_dimensions(&self, width: usize, height: usize) -> Result<()> {
        if (width, height) != (self.width, self.height) {
            return Err(Error::DimensionsMismatch {
                expected: (self.width, self.height),
                actual: (width, height),
            });
        }
        Ok(())
    }

    /// Sample spline transformations on grids of `delta` pixels over the image.
    pub fn initialize_grid_interpolations(&mut self, delta: f64) -> Result<()> {
        let rect = self.bounds();
        if let Some(t) = self.transformation_mut().and_then(WorldTransformation::as_spline_mut) {
            t.initialize_grid_interpolations(rect, delta)?;
        }
        Ok(())
    }

    // ── Coordinate conversions ──────────────────────────────────────────────

    /// Celestial `(ra, dec)` of an image point, with `ra` in `[0, 360)`.
    pub fn image_to_celestial(&self, p: Point) -> Option<Point> {
        self.raw_image_to_celestial(p).map(|q| {
            let ra = q.x.rem_euclid(360.0);
            Point::new(if ra >= 360.0 { 0.0 } else { ra }, q.y)
        })
    }

    /// As [`image_to_celestial`](Self::image_to_celestial) but without
    /// wrapping `ra`, which stays continuous across the 0/360 boundary.
    pub fn raw_image_to_celestial(&self, p: Point) -> Option<Point> {
        let (projection, transformation) = self.parts().ok()?;
        projection
            .inverse(transformation.inverse(p))
            .filter(Point::is_finite)
    }

    pub fn celestial_to_image(&self, q: Point) -> Option<Point> {
        let (projection, transformation) = self.parts().ok()?;
        projection
            .direct(q)
            .map(|w| transformation.direct(w))
            .filter(Point::is_finite)
    }

    fn check_points(&self) -> [Point; 5] {
        let (w, h) = (self.width as f64, self.height as f64);
        [
            Point::new(w / 2.0, h / 2.0),
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(0.0, h),
            Point::new(w, h),
        ]
    }

    /// Round-trip image -> celestial -> image at the center and the four
    /// corners. Returns the pixel deltas; points that cannot be converted
    /// yield infinite deltas.
    pub fn verify(&self) -> Result<[Point; 5]> {
        self.parts()?;
        Ok(self.check_points().map(|p| {
            self.image_to_celestial(p)
                .and_then(|q| self.celestial_to_image(q))
                .map_or(Point::new(f64::INFINITY, f64::INFINITY), |r| r - p)
        }))
    }

    /// Fail with [`Error::InconsistentSolution`] when the center round trip
    /// exceeds `tolerance` pixels on either axis.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        let [center, ..] = self.verify()?;
        if !(center.x.abs() <= tolerance && center.y.abs() <= tolerance) {
            return Err(Error::InconsistentSolution {
                dx: center.x,
                dy: center.y,
                tolerance,
            });
        }
        Ok(())
    }

    /// Rotation angle in degrees and mirror flag.
    pub fn rotation(&self) -> Result<(f64, bool)> {
        let (_, t) = self.parts()?;
        Ok(rotation_of(&t.approximate_linear_transform()))
    }

    /// Largest angular distance in degrees from the image center to a corner.
    pub fn search_radius(&self) -> Result<f64> {
        self.parts()?;
        let [c, corners @ ..] = self.check_points();
        let center = self
            .raw_image_to_celestial(c)
            .ok_or(Error::NotInitialized("celestial image center"))?;
        Ok(corners
            .iter()
            .filter_map(|&p| self.raw_image_to_celestial(p))
            .map(|q| angular_distance(center, q))
            .fold(0.0, f64::max))
    }

    // ── Keywords and properties ─────────────────────────────────────────────

    /// Update a keyword set and a property set with this solution.
    pub fn write(&self, keywords: &mut KeywordSet, properties: &mut PropertySet) -> Result<()> {
        let (projection, transformation) = self.parts()?;
        for name in BASIC_KEYWORDS {
            keywords.remove(name);
        }

        let center = self.check_points()[0];
        let celestial = self.image_to_celestial(center);
        if let Some(c) = celestial {
            keywords.set(FitsKeyword::number("RA", c.x, 12, "Right ascension of the center of the image (deg)"));
            keywords.set(FitsKeyword::number("DEC", c.y, 12, "Declination of the center of the image (deg)"));
            keywords.set(FitsKeyword::string(
                "OBJCTRA",
                &format_sexagesimal(c.x / 15.0, 3, false, ' ', 2),
                "Right ascension of the center of the image (hms)",
            ));
            keywords.set(FitsKeyword::string(
                "OBJCTDEC",
                &format_sexagesimal(c.y, 2, true, ' ', 2),
                "Declination of the center of the image (dms)",
            ));
        }
        if self.observation_start.is_some() || self.observation_end.is_some() {
            keywords.set(FitsKeyword::string("TIMESYS", "UTC", "Time scale: Universal Time, Coordinated"));
        }
        if let Some(t) = &self.observation_start {
            keywords.set(FitsKeyword::string("DATE-OBS", &format_fits_time(t), "Beginning of observation (UTC)"));
        }
        if let Some(t) = &self.observation_end {
            keywords.set(FitsKeyword::string("DATE-END", &format_fits_time(t), "End of observation (UTC)"));
        }
        if let Some((lon, lat, alt)) = self.geodetic_coordinates() {
            for name in ["OBSGEO-L", "LONG-OBS", "SITELONG"] {
                keywords.set(FitsKeyword::number(name, lon, 10, "Geodetic longitude of observation location (deg)"));
            }
            for name in ["OBSGEO-B", "LAT-OBS", "SITELAT"] {
                keywords.set(FitsKeyword::number(name, lat, 10, "Geodetic latitude of observation location (deg)"));
            }
            if let Some(h) = alt {
                for name in ["OBSGEO-H", "ALT-OBS", "SITEELEV"] {
                    keywords.set(FitsKeyword::number(name, h, 6, "Geodetic height of observation location (m)"));
                }
            }
        }
        if let Some(f) = self.focal_length {
            keywords.set(FitsKeyword::number("FOCALLEN", f, 6, "Focal length (mm)"));
        }
        if let Some(px) = self.pixel_size {
            keywords.set(FitsKeyword::number("XPIXSZ", px, 6, "Pixel size including binning, X-axis (um)"));
            keywords.set(FitsKeyword::number("YPIXSZ", px, 6, "Pixel size including binning, Y-axis (um)"));
        }

        let mut wcs = WcsKeywords {
            radesys: self.reference_system.clone(),
            equinox: self.equinox,
            ..Default::default()
        };
        projection.fill_wcs_keywords(&mut wcs);
        wcs.set_linear(&transformation.approximate_linear_transform(), self.height as f64)?;
        wcs.write_wcs(keywords);

        match transformation.serialized_control_points() {
            Some(bytes) => {
                keywords.set(FitsKeyword::logical("REFSPLIN", true, "Spline-based astrometric solution available"));
                properties.set(CONTROL_POINTS_PROPERTY, PropertyValue::Bytes(bytes?));
            }
            None => {
                properties.remove(CONTROL_POINTS_PROPERTY);
            }
        }

        if let Some(c) = celestial {
            properties.set("Observation:Center:RA", PropertyValue::Float(c.x));
            properties.set("Observation:Center:Dec", PropertyValue::Float(c.y));
        }
        if let Some(s) = &self.reference_system {
            properties.set("Observation:CelestialReferenceSystem", PropertyValue::String(s.clone()));
        }
        match self.equinox {
            Some(e) => properties.set("Observation:Equinox", PropertyValue::Float(e)),
            None => {
                properties.remove("Observation:Equinox");
            }
        }
        properties.remove("Observation:Center:X");
        properties.remove("Observation:Center:Y");
        Ok(())
    }

    // ── Reporting ───────────────────────────────────────────────────────────

    pub fn description(&self) -> Result<&Description> {
        let (projection, transformation) = self.parts()?;
        if let Some(d) = self.description.get() {
            return Ok(d);
        }
        let linear = transformation.approximate_linear_transform();
        let (rotation, flipped) = rotation_of(&linear);
        let corners = self.check_points();
        let corner_coords = [1usize, 2, 3, 4].map(|i| self.image_to_celestial(corners[i]));
        let spline_residuals = if transformation.is_spline() {
            let deltas = self.verify()?;
            Some([deltas[1], deltas[2], deltas[3], deltas[4]])
        } else {
            None
        };
        let description = Description {
            reference_matrix: linear.to_string(),
            transformation_type: if transformation.is_spline() {
                "Thin plate spline".to_string()
            } else {
                "Linear".to_string()
            },
            projection_name: projection.name().to_string(),
            projection_origin: projection.origin(),
            resolution: self.resolution * 3600.0,
            rotation,
            flipped,
            field_of_view: (
                self.width as f64 * self.resolution,
                self.height as f64 * self.resolution,
            ),
            center: self.image_to_celestial(corners[0]),
            corners: corner_coords,
            spline_residuals,
            observation_start: self.observation_start,
            observation_end: self.observation_end,
            location: self.geodetic_coordinates(),
            focal_length: self.focal_length,
            pixel_size: self.pixel_size,
        };
        Ok(self.description.get_or_init(|| description))
    }

    /// Plain-text report of the solution.
    pub fn summary(&self) -> Result<String> {
        let d = self.description()?;
        let ra = |v: f64| format_sexagesimal(v / 15.0, 3, false, ' ', 2);
        let dec = |v: f64| format_sexagesimal(v, 2, true, ' ', 2);
        let mut s = String::new();

        s.push_str("Referentiation Matrix (Projection = Matrix * Coords[x,y]):\n");
        for row in d.reference_matrix.lines() {
            s.push_str(&format!("            {row}\n"));
        }
        s.push_str(&format!("WCS transformation ...... {}\n", d.transformation_type));
        s.push_str(&format!("Projection .............. {}\n", d.projection_name));
        s.push_str(&format!(
            "Projection origin ....... RA: {}  Dec: {}\n",
            ra(d.projection_origin.x),
            dec(d.projection_origin.y)
        ));
        s.push_str(&format!("Resolution .............. {:.3} arcsec/px\n", d.resolution));
        s.push_str(&format!(
            "Rotation ................ {:.3} deg{}\n",
            d.rotation,
            if d.flipped { " (flipped)" } else { "" }
        ));
        if let Some(reference) = &self.reference_system {
            s.push_str(&format!("Reference system ........ {reference}\n"));
        }
        if let Some(t) = d.observation_start {
            s.push_str(&format!("Observation start time .. {}\n", format_fits_time(&t)));
        }
        if let Some(t) = d.observation_end {
            s.push_str(&format!("Observation end time .... {}\n", format_fits_time(&t)));
        }
        if let Some((lon, lat, alt)) = d.location {
            s.push_str(&format!(
                "Geodetic coordinates .... {}  {}",
                format_sexagesimal(lon, 0, true, ' ', 3),
                format_sexagesimal(lat, 0, true, ' ', 2)
            ));
            if let Some(h) = alt {
                s.push_str(&format!("  {h:.0} m"));
            }
            s.push('\n');
        }
        if let Some(f) = d.focal_length {
            s.push_str(&format!("Focal distance .......... {f:.2} mm\n"));
        }
        if let Some(px) = d.pixel_size {
            s.push_str(&format!("Pixel size .............. {px:.2} um\n"));
        }
        s.push_str(&format!(
            "Field of view ........... {:.3} deg x {:.3} deg\n",
            d.field_of_view.0, d.field_of_view.1
        ));
        let labels = ["Top-left", "Top-right", "Bottom-left", "Bottom-right"];
        if let Some(c) = d.center {
            s.push_str(&format!("Image center ............ RA: {}  Dec: {}\n", ra(c.x), dec(c.y)));
        }
        s.push_str("Image bounds:\n");
        for (i, label) in labels.iter().enumerate() {
            match d.corners[i] {
                Some(c) => s.push_str(&format!("   {label:<13} RA: {}  Dec: {}", ra(c.x), dec(c.y))),
                None => s.push_str(&format!("   {label:<13} ------")),
            }
            if let Some(r) = &d.spline_residuals {
                s.push_str(&format!("  ({:+.3}, {:+.3}) px", r[i].x, r[i].y));
            }
            s.push('\n');
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astrometry::projection::{ZenithalKind, ZenithalProjection};

    fn linear_solution() -> AstrometricMetadata {
        let keywords: KeywordSet = [
            FitsKeyword::string("CTYPE1", "RA---TAN", ""),
            FitsKeyword::string("CTYPE2", "DEC--TAN", ""),
            FitsKeyword::new("CRPIX1", "512.5", ""),
            FitsKeyword::new("CRPIX2", "512.5", ""),
            FitsKeyword::new("CRVAL1", "180.0", ""),
            FitsKeyword::new("CRVAL2", "0.0", ""),
            FitsKeyword::new("CD1_1", "-0.0002777778", ""),
            FitsKeyword::new("CD1_2", "0.0", ""),
            FitsKeyword::new("CD2_1", "0.0", ""),
            FitsKeyword::new("CD2_2", "0.0002777778", ""),
            FitsKeyword::new("XPIXSZ", "5.4", ""),
        ]
        .into_iter()
        .collect();
        AstrometricMetadata::from_bundle(&PropertySet::new(), &keywords, &[], 1024, 1024).unwrap()
    }

    #[test]
    fn rotation_formula() {
        let standard = LinearTransformation::new(-1e-3, 0.0, 0.0, 0.0, -1e-3, 0.0);
        let (rot, flipped) = rotation_of(&standard);
        assert!(rot.abs() < 1e-9 && !flipped);
        let mirrored = LinearTransformation::new(1e-3, 0.0, 0.0, 0.0, -1e-3, 0.0);
        assert!(rotation_of(&mirrored).1);
    }

    #[test]
    fn rotating_the_image_shifts_rotation() {
        let center = Point::new(512.0, 512.0);
        let solve = |a: LinearTransformation| {
            let p = ZenithalProjection::new(ZenithalKind::Gnomonic, 180.0, 0.0, None).unwrap();
            let t = LinearWorldTransformation::new(a).unwrap();
            AstrometricMetadata::new(Box::new(p), t.into(), 1024, 1024)
                .unwrap()
                .rotation()
                .unwrap()
        };
        // Turning the image by `theta` about its center maps new pixels to
        // old ones through R(-theta).
        let turned = |a: &LinearTransformation, theta: f64| {
            let (s, c) = f64::to_radians(theta).sin_cos();
            let r = LinearTransformation::new(c, s, 0.0, -s, c, 0.0);
            let shift = center - r.transform(center);
            a.multiply(&LinearTransformation::new(c, s, shift.x, -s, c, shift.y))
        };
        let k = 2.8e-4;
        for base in [
            LinearTransformation::new(-k, 0.0, 0.14, 0.0, -k, 0.14),
            LinearTransformation::new(k, 0.0, -0.14, 0.0, -k, 0.14),
        ] {
            let base = turned(&base, -25.0);
            let (rot0, flipped0) = solve(base);
            for theta in [0.0, 30.0, -45.0, 90.0, 155.0, 179.9, 180.0, -179.9, 270.0] {
                let (rot, flipped) = solve(turned(&base, theta));
                assert_eq!(flipped, flipped0);
                assert!(rot > -180.0 && rot <= 180.0, "{rot}");
                let d = (rot - rot0 - theta).rem_euclid(360.0);
                assert!(d < 1e-6 || d > 360.0 - 1e-6, "theta {theta}: {rot0} -> {rot}");
            }
        }
    }

    #[test]
    fn resolution_and_focal_length() {
        let m = linear_solution();
        assert!((m.resolution() * 3600.0 - 1.0).abs() < 1e-6);
        // 5.4 um at 1 arcsec/px.
        assert!((m.focal_length().unwrap() - 1113.83).abs() < 0.01);
    }

    #[test]
    fn missing_mandatory_keywords_fail() {
        let keywords: KeywordSet = [FitsKeyword::string("CTYPE1", "RA---TAN", "")].into_iter().collect();
        assert!(matches!(
            AstrometricMetadata::from_bundle(&PropertySet::new(), &keywords, &[], 10, 10),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn uninitialized_solution() {
        let m = AstrometricMetadata::default();
        assert!(!m.is_valid());
        assert!(m.image_to_celestial(Point::new(1.0, 1.0)).is_none());
        assert!(matches!(m.validate(0.01), Err(Error::NotInitialized(_))));
    }

    #[test]
    fn setters_enforce_ranges() {
        let mut m = linear_solution();
        assert!(m.set_geodetic_coordinates(10.0, 95.0, None).is_err());
        m.set_geodetic_coordinates(350.0, 45.0, Some(100.0)).unwrap();
        assert_eq!(m.geodetic_coordinates(), Some((-10.0, 45.0, Some(100.0))));
        assert!(m.set_pixel_size(0.0).is_err());
        assert!(matches!(
            m.check_dimensions(1024, 1000),
            Err(Error::DimensionsMismatch { .. })
        ));
        m.check_dimensions(1024, 1024).unwrap();
    }

    #[test]
    fn search_radius_reaches_corners() {
        let m = linear_solution();
        let expected = (512.0f64 * 2.0f64.sqrt()) / 3600.0;
        assert!((m.search_radius().unwrap() - expected).abs() < 1e-3 * expected);
    }

    #[test]
    fn description_is_cached_and_reset() {
        let mut m = linear_solution();
        assert_eq!(m.description().unwrap().transformation_type, "Linear");
        assert!(m.description().unwrap().location.is_none());
        m.set_geodetic_coordinates(1.0, 2.0, None).unwrap();
        assert_eq!(m.description().unwrap().location, Some((1.0, 2.0, None)));
        let summary = m.summary().unwrap();
        assert!(summary.contains("Resolution"));
        assert!(summary.contains("Gnomonic"));
    }

    #[test]
    fn empty_dimensions_rejected() {
        let p = ZenithalProjection::new(ZenithalKind::Gnomonic, 0.0, 0.0, None).unwrap();
        let t = LinearWorldTransformation::new(LinearTransformation::identity()).unwrap();
        assert!(matches!(
            AstrometricMetadata::new(Box::new(p), t.into(), 0, 10),
            Err(Error::EmptyDomain(_))
        ));
    }
}

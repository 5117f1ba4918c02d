//! WCS and observation keywords.
//!
//! [`WcsKeywords`] gathers every quantity an astrometric solution reads from
//! or writes to a FITS header. Values are read from a [`KeywordSet`] first and
//! then overridden by a [`PropertySet`]. A value that fails to parse is logged
//! and left undefined; reading never fails as a whole.
//!
//! FITS pixel coordinates put the first pixel center at `(1, 1)` with `y`
//! growing upwards. Image coordinates in this crate put it at `(0.5, 0.5)`
//! with `y` growing downwards:
//!
//! ```text
//! x_fits = x + 0.5
//! y_fits = height + 0.5 - y
//! ```

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::keywords::{
    parse_fits_time, parse_sexagesimal, FitsKeyword, KeywordSet, ParseReport, PropertySet,
};
use crate::linear_transformation::LinearTransformation;

/// Normalize a longitude to `(-180, 180]`.
pub fn normalize_longitude(lon: f64) -> f64 {
    let l = lon.rem_euclid(360.0);
    if l > 180.0 {
        l - 360.0
    } else {
        l
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WcsKeywords {
    // ── Observation ──
    /// Approximate center right ascension, degrees in `[0, 360)`.
    pub object_ra: Option<f64>,
    /// Approximate center declination, degrees.
    pub object_dec: Option<f64>,
    pub radesys: Option<String>,
    pub equinox: Option<f64>,
    pub date_obs: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    /// Geodetic longitude, degrees in `(-180, 180]`.
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Height above the reference ellipsoid, meters.
    pub altitude: Option<f64>,
    /// Millimeters.
    pub focal_length: Option<f64>,
    /// Micrometers.
    pub xpixsz: Option<f64>,
    pub ypixsz: Option<f64>,

    // ── WCS ──
    pub ctype1: Option<String>,
    pub ctype2: Option<String>,
    pub crval1: Option<f64>,
    pub crval2: Option<f64>,
    pub crpix1: Option<f64>,
    pub crpix2: Option<f64>,
    pub cd1_1: Option<f64>,
    pub cd1_2: Option<f64>,
    pub cd2_1: Option<f64>,
    pub cd2_2: Option<f64>,
    pub pc1_1: Option<f64>,
    pub pc1_2: Option<f64>,
    pub pc2_1: Option<f64>,
    pub pc2_2: Option<f64>,
    pub cdelt1: Option<f64>,
    pub cdelt2: Option<f64>,
    pub crota1: Option<f64>,
    pub crota2: Option<f64>,
    pub lonpole: Option<f64>,
    pub latpole: Option<f64>,
    /// REFSPLIN: the solution carries a spline transformation.
    pub ref_spline: bool,
}

fn first_number(keywords: &KeywordSet, names: &[&str], report: &mut ParseReport) -> Option<f64> {
    names
        .iter()
        .find(|n| keywords.contains(n))
        .and_then(|n| report.field(n, keywords.try_f64(n)))
}

/// Angle keyword given either as a decimal number or in sexagesimal form.
pub(crate) fn angle_keyword(keywords: &KeywordSet, name: &str, hours: bool) -> Result<Option<f64>> {
    let Some(text) = keywords.value(name) else {
        return Ok(None);
    };
    let sexagesimal = text.trim().contains([' ', ':']);
    let v = if sexagesimal {
        parse_sexagesimal(&text)?
    } else {
        text.trim()
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .map_err(|_| Error::Parse(format!("invalid {name} keyword value '{text}'")))?
    };
    Ok(Some(if hours && sexagesimal { v * 15.0 } else { v }))
}

fn right_ascension(value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(ra) if !(0.0..360.0).contains(&ra) => Err(Error::OutOfRange {
            what: "right ascension",
            value: ra,
        }),
        v => Ok(v),
    }
}

fn declination(value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(dec) if !(-90.0..=90.0).contains(&dec) => Err(Error::OutOfRange {
            what: "declination",
            value: dec,
        }),
        v => Ok(v),
    }
}

fn latitude(value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(lat) if !(-90.0..=90.0).contains(&lat) => Err(Error::OutOfRange {
            what: "geodetic latitude",
            value: lat,
        }),
        v => Ok(v),
    }
}

fn time(keywords: &KeywordSet, name: &str) -> Result<Option<DateTime<Utc>>> {
    keywords.value(name).map(|t| parse_fits_time(&t)).transpose()
}

impl WcsKeywords {
    /// Read keywords, then let properties override them.
    pub fn read(keywords: &KeywordSet, properties: &PropertySet) -> Self {
        let mut report = ParseReport::new();
        let mut w = Self::from_keywords(keywords, &mut report);
        w.apply_properties(properties, &mut report);
        w
    }

    fn from_keywords(k: &KeywordSet, report: &mut ParseReport) -> Self {
        let mut w = WcsKeywords::default();

        let ra = angle_keyword(k, "RA", true).and_then(|v| match v {
            Some(v) => Ok(Some(v)),
            None => angle_keyword(k, "OBJCTRA", true),
        });
        let ra = ra.and_then(right_ascension);
        w.object_ra = report.field("RA", ra);
        let dec = angle_keyword(k, "DEC", false).and_then(|v| match v {
            Some(v) => Ok(Some(v)),
            None => angle_keyword(k, "OBJCTDEC", false),
        });
        w.object_dec = report.field("DEC", dec.and_then(declination));

        w.radesys = k.value("RADESYS").map(|s| s.to_uppercase());
        w.equinox = first_number(k, &["EQUINOX", "EPOCH"], report);

        let start = if k.contains("DATE-OBS") { "DATE-OBS" } else { "DATE-BEG" };
        w.date_obs = report.field(start, time(k, start));
        w.date_end = report.field("DATE-END", time(k, "DATE-END"));

        let lon = ["OBSGEO-L", "LONG-OBS", "SITELONG"]
            .into_iter()
            .find(|n| k.contains(n))
            .and_then(|n| report.field(n, angle_keyword(k, n, false)));
        w.longitude = lon.map(normalize_longitude);
        let lat = ["OBSGEO-B", "LAT-OBS", "SITELAT"]
            .into_iter()
            .find(|n| k.contains(n))
            .and_then(|n| report.field(n, angle_keyword(k, n, false).and_then(latitude)));
        w.latitude = lat;
        w.altitude = first_number(k, &["OBSGEO-H", "ALT-OBS", "SITEELEV"], report);

        w.focal_length = first_number(k, &["FOCALLEN"], report);
        w.xpixsz = first_number(k, &["XPIXSZ", "PIXSIZE"], report);
        w.ypixsz = first_number(k, &["YPIXSZ", "PIXSIZE"], report);

        w.ctype1 = k.value("CTYPE1");
        w.ctype2 = k.value("CTYPE2");
        w.crval1 = first_number(k, &["CRVAL1"], report);
        w.crval2 = first_number(k, &["CRVAL2"], report);
        w.crpix1 = first_number(k, &["CRPIX1"], report);
        w.crpix2 = first_number(k, &["CRPIX2"], report);
        w.cd1_1 = first_number(k, &["CD1_1"], report);
        w.cd1_2 = first_number(k, &["CD1_2"], report);
        w.cd2_1 = first_number(k, &["CD2_1"], report);
        w.cd2_2 = first_number(k, &["CD2_2"], report);
        w.pc1_1 = first_number(k, &["PC1_1"], report);
        w.pc1_2 = first_number(k, &["PC1_2"], report);
        w.pc2_1 = first_number(k, &["PC2_1"], report);
        w.pc2_2 = first_number(k, &["PC2_2"], report);
        w.cdelt1 = first_number(k, &["CDELT1"], report);
        w.cdelt2 = first_number(k, &["CDELT2"], report);
        w.crota1 = first_number(k, &["CROTA1"], report);
        w.crota2 = first_number(k, &["CROTA2"], report);
        w.lonpole = first_number(k, &["LONPOLE", "PV1_3"], report);
        w.latpole = first_number(k, &["LATPOLE", "PV1_4"], report);
        w.ref_spline = k.get("REFSPLIN").and_then(FitsKeyword::as_bool).unwrap_or(false);
        w
    }

    fn apply_properties(&mut self, p: &PropertySet, report: &mut ParseReport) {
        if let Some(ra) = p.f64("Observation:Center:RA") {
            if let Some(ra) = report.field("Observation:Center:RA", right_ascension(Some(ra))) {
                self.object_ra = Some(ra);
            }
        }
        if let Some(dec) = p.f64("Observation:Center:Dec") {
            if let Some(dec) = report.field("Observation:Center:Dec", declination(Some(dec))) {
                self.object_dec = Some(dec);
            }
        }
        if let Some(s) = p.string("Observation:CelestialReferenceSystem") {
            self.radesys = Some(s.trim().to_uppercase());
        }
        if let Some(e) = p.f64("Observation:Equinox") {
            self.equinox = Some(e);
        }
        if let Some(t) = p.time("Observation:Time:Start") {
            self.date_obs = Some(t);
        }
        if let Some(t) = p.time("Observation:Time:End") {
            self.date_end = Some(t);
        }
        if let Some(lon) = p.f64("Observation:Location:Longitude") {
            self.longitude = Some(normalize_longitude(lon));
        }
        if let Some(lat) = p.f64("Observation:Location:Latitude") {
            if let Some(lat) = report.field("Observation:Location:Latitude", latitude(Some(lat))) {
                self.latitude = Some(lat);
            }
        }
        if let Some(h) = p.f64("Observation:Location:Elevation") {
            self.altitude = Some(h);
        }
        if let Some(f) = p.f64("Instrument:Telescope:FocalLength") {
            // Meters at the property layer.
            self.focal_length = Some(f * 1000.0);
        }
        if let Some(s) = p.f64("Instrument:Sensor:XPixelSize") {
            self.xpixsz = Some(s);
        }
        if let Some(s) = p.f64("Instrument:Sensor:YPixelSize") {
            self.ypixsz = Some(s);
        }
    }

    /// CTYPE1/2 name celestial axes and CRPIX1/2, CRVAL1/2 are all defined.
    pub fn is_valid(&self) -> bool {
        self.ctype1.as_deref().is_some_and(|c| c.starts_with("RA--"))
            && self.ctype2.as_deref().is_some_and(|c| c.starts_with("DEC-"))
            && self.crpix1.is_some()
            && self.crpix2.is_some()
            && self.crval1.is_some()
            && self.crval2.is_some()
    }

    /// The CD matrix, from CD keywords, PC plus CDELT, or CDELT plus CROTA2,
    /// in that order of preference.
    pub fn cd_matrix(&self) -> Result<[f64; 4]> {
        if let (Some(a), Some(b), Some(c), Some(d)) = (self.cd1_1, self.cd1_2, self.cd2_1, self.cd2_2) {
            return Ok([a, b, c, d]);
        }
        let (Some(c1), Some(c2)) = (self.cdelt1, self.cdelt2) else {
            return Err(Error::Parse("no CD matrix or CDELT scale defined".into()));
        };
        if self.pc1_1.is_some() || self.pc1_2.is_some() || self.pc2_1.is_some() || self.pc2_2.is_some() {
            return Ok([
                c1 * self.pc1_1.unwrap_or(1.0),
                c1 * self.pc1_2.unwrap_or(0.0),
                c2 * self.pc2_1.unwrap_or(0.0),
                c2 * self.pc2_2.unwrap_or(1.0),
            ]);
        }
        let rho = self.crota2.or(self.crota1).unwrap_or(0.0).to_radians();
        let (s, c) = rho.sin_cos();
        Ok([c1 * c, -c2 * s, c1 * s, c2 * c])
    }

    /// Linear map from image coordinates to native plane coordinates.
    pub fn image_to_world(&self, height: f64) -> Result<LinearTransformation> {
        let crpix1 = self.crpix1.ok_or_else(|| Error::Parse("missing CRPIX1".into()))?;
        let crpix2 = self.crpix2.ok_or_else(|| Error::Parse("missing CRPIX2".into()))?;
        let [cd11, cd12, cd21, cd22] = self.cd_matrix()?;
        let ox = 0.5 - crpix1;
        let oy = height + 0.5 - crpix2;
        Ok(LinearTransformation::new(
            cd11,
            -cd12,
            cd11 * ox + cd12 * oy,
            cd21,
            -cd22,
            cd21 * ox + cd22 * oy,
        ))
    }

    /// Set CRPIX, CD, CDELT and CROTA from a linear image to native map.
    /// PC keywords are cleared.
    pub fn set_linear(&mut self, image_to_world: &LinearTransformation, height: f64) -> Result<()> {
        let origin = image_to_world.inverse()?.transform(Point::new(0.0, 0.0));
        self.crpix1 = Some(origin.x + 0.5);
        self.crpix2 = Some(height + 0.5 - origin.y);
        let cd11 = image_to_world.a00;
        let cd12 = -image_to_world.a01;
        let cd21 = image_to_world.a10;
        let cd22 = -image_to_world.a11;
        self.cd1_1 = Some(cd11);
        self.cd1_2 = Some(cd12);
        self.cd2_1 = Some(cd21);
        self.cd2_2 = Some(cd22);

        let rho = (-cd12).atan2(cd22);
        let (s, c) = rho.sin_cos();
        let (cdelt1, cdelt2) = if c.abs() > s.abs() {
            (cd11 / c, cd22 / c)
        } else {
            (cd21 / s, -cd12 / s)
        };
        self.cdelt1 = Some(cdelt1);
        self.cdelt2 = Some(cdelt2);
        self.crota1 = Some(rho.to_degrees());
        self.crota2 = Some(rho.to_degrees());
        self.pc1_1 = None;
        self.pc1_2 = None;
        self.pc2_1 = None;
        self.pc2_2 = None;
        Ok(())
    }

    /// Write the WCS keywords, replacing existing cards.
    pub fn write_wcs(&self, keywords: &mut KeywordSet) {
        for name in ["PC1_1", "PC1_2", "PC2_1", "PC2_2"] {
            keywords.remove(name);
        }
        if let Some(s) = &self.radesys {
            keywords.set(FitsKeyword::string("RADESYS", s, "Reference system of celestial coordinates"));
        }
        if let Some(e) = self.equinox {
            keywords.set(FitsKeyword::number("EQUINOX", e, 6, "Epoch of the mean equator and equinox (years)"));
        }
        if let Some(s) = &self.ctype1 {
            keywords.set(FitsKeyword::string("CTYPE1", s, "Axis1 projection"));
        }
        if let Some(s) = &self.ctype2 {
            keywords.set(FitsKeyword::string("CTYPE2", s, "Axis2 projection"));
        }
        let numbers = [
            ("CRPIX1", self.crpix1, "Axis1 reference pixel"),
            ("CRPIX2", self.crpix2, "Axis2 reference pixel"),
            ("CRVAL1", self.crval1, "Axis1 reference value"),
            ("CRVAL2", self.crval2, "Axis2 reference value"),
            ("CD1_1", self.cd1_1, "Scale matrix (1,1)"),
            ("CD1_2", self.cd1_2, "Scale matrix (1,2)"),
            ("CD2_1", self.cd2_1, "Scale matrix (2,1)"),
            ("CD2_2", self.cd2_2, "Scale matrix (2,2)"),
            ("CDELT1", self.cdelt1, "Axis1 scale"),
            ("CDELT2", self.cdelt2, "Axis2 scale"),
            ("CROTA1", self.crota1, "Axis1 rotation angle (deg)"),
            ("CROTA2", self.crota2, "Axis2 rotation angle (deg)"),
            ("LONPOLE", self.lonpole, "Native longitude of celestial pole"),
            ("LATPOLE", self.latpole, "Native latitude of celestial pole"),
        ];
        for (name, value, comment) in numbers {
            if let Some(v) = value {
                keywords.set(FitsKeyword::number(name, v, 12, comment));
            }
        }
    }
}

//! Spherical projections.
//!
//! A projection maps celestial coordinates `(ra, dec)` to native plane
//! coordinates `(x, y)`, all in degrees. The zenithal projections implemented
//! here follow Calabretta & Greisen (2002): celestial coordinates are first
//! rotated into native spherical coordinates `(φ, θ)` about the reference
//! point, then mapped radially with `x = R(θ)·sin φ`, `y = −R(θ)·cos φ`.

use std::fmt;

use crate::error::{Error, Result};
use crate::geometry::Point;

use super::wcs::WcsKeywords;

/// Contract of a celestial projection.
pub trait Projection: fmt::Debug + Send + Sync {
    /// Celestial `(ra, dec)` to native plane coordinates, or `None` where
    /// the projection is undefined.
    fn direct(&self, celestial: Point) -> Option<Point>;

    /// Native plane coordinates to celestial `(ra, dec)`. Right ascension is
    /// *not* wrapped: it is continuous around the reference point and may fall
    /// outside `[0, 360)`.
    fn inverse(&self, native: Point) -> Option<Point>;

    /// Celestial reference point `(ra0, dec0)`.
    fn origin(&self) -> Point;

    /// Human-readable name, e.g. "Gnomonic".
    fn name(&self) -> &'static str;

    /// Three-letter WCS code, e.g. "TAN".
    fn identifier(&self) -> &'static str;

    /// Write CTYPE, CRVAL, LONPOLE and LATPOLE values.
    fn fill_wcs_keywords(&self, wcs: &mut WcsKeywords);

    fn clone_box(&self) -> Box<dyn Projection>;
}

impl Clone for Box<dyn Projection> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Radial law of a zenithal projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZenithalKind {
    /// TAN: `R = (180/π)·cot θ`.
    Gnomonic,
    /// STG: `R = (360/π)·tan((90−θ)/2)`.
    Stereographic,
    /// SIN: `R = (180/π)·cos θ`.
    Orthographic,
    /// ARC: `R = 90 − θ`.
    ZenithalEquidistant,
    /// ZEA: `R = (360/π)·sin((90−θ)/2)`.
    ZenithalEqualArea,
}

impl ZenithalKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "TAN" => Some(Self::Gnomonic),
            "STG" => Some(Self::Stereographic),
            "SIN" => Some(Self::Orthographic),
            "ARC" => Some(Self::ZenithalEquidistant),
            "ZEA" => Some(Self::ZenithalEqualArea),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Gnomonic => "TAN",
            Self::Stereographic => "STG",
            Self::Orthographic => "SIN",
            Self::ZenithalEquidistant => "ARC",
            Self::ZenithalEqualArea => "ZEA",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gnomonic => "Gnomonic",
            Self::Stereographic => "Stereographic",
            Self::Orthographic => "Orthographic",
            Self::ZenithalEquidistant => "Zenithal Equidistant",
            Self::ZenithalEqualArea => "Zenithal Equal Area",
        }
    }

    /// Radial distance in degrees for native latitude `theta` (degrees).
    fn radius(self, theta: f64) -> Option<f64> {
        let r2d = 180.0 / std::f64::consts::PI;
        match self {
            Self::Gnomonic => {
                if theta <= 0.0 {
                    None
                } else {
                    Some(r2d / theta.to_radians().tan())
                }
            }
            Self::Stereographic => {
                if theta <= -90.0 {
                    None
                } else {
                    Some(2.0 * r2d * ((90.0 - theta) / 2.0).to_radians().tan())
                }
            }
            Self::Orthographic => {
                if theta < 0.0 {
                    None
                } else {
                    Some(r2d * theta.to_radians().cos())
                }
            }
            Self::ZenithalEquidistant => Some(90.0 - theta),
            Self::ZenithalEqualArea => Some(2.0 * r2d * ((90.0 - theta) / 2.0).to_radians().sin()),
        }
    }

    /// Native latitude in degrees for radial distance `r` (degrees).
    fn theta(self, r: f64) -> Option<f64> {
        let d2r = std::f64::consts::PI / 180.0;
        match self {
            Self::Gnomonic => Some(1.0f64.atan2(r * d2r).to_degrees()),
            Self::Stereographic => Some(90.0 - 2.0 * (r * d2r / 2.0).atan().to_degrees()),
            Self::Orthographic => {
                let c = r * d2r;
                (c <= 1.0).then(|| c.acos().to_degrees())
            }
            Self::ZenithalEquidistant => (r <= 180.0).then(|| 90.0 - r),
            Self::ZenithalEqualArea => {
                let s = r * d2r / 2.0;
                (s <= 1.0).then(|| 90.0 - 2.0 * s.asin().to_degrees())
            }
        }
    }
}

/// A zenithal projection about `(ra0, dec0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ZenithalProjection {
    kind: ZenithalKind,
    ra0: f64,
    dec0: f64,
    /// Native longitude of the celestial pole, degrees.
    lonpole: f64,
    sin_dec0: f64,
    cos_dec0: f64,
}

impl ZenithalProjection {
    /// `lonpole` defaults to 180°, the native longitude of the celestial pole
    /// when the reference point is not the pole itself.
    pub fn new(kind: ZenithalKind, ra0: f64, dec0: f64, lonpole: Option<f64>) -> Result<Self> {
        if !(-90.0..=90.0).contains(&dec0) {
            return Err(Error::OutOfRange {
                what: "projection origin declination",
                value: dec0,
            });
        }
        if !ra0.is_finite() {
            return Err(Error::OutOfRange {
                what: "projection origin right ascension",
                value: ra0,
            });
        }
        let (s, c) = dec0.to_radians().sin_cos();
        Ok(Self {
            kind,
            ra0: ra0.rem_euclid(360.0),
            dec0,
            lonpole: lonpole.unwrap_or(if dec0 >= 90.0 { 0.0 } else { 180.0 }),
            sin_dec0: s,
            cos_dec0: c,
        })
    }

    pub fn kind(&self) -> ZenithalKind {
        self.kind
    }

    pub fn lonpole(&self) -> f64 {
        self.lonpole
    }

    /// Celestial to native spherical `(φ, θ)`, degrees.
    fn celestial_to_native(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (sd, cd) = dec.to_radians().sin_cos();
        let (sa, ca) = (ra - self.ra0).to_radians().sin_cos();
        let phi = self.lonpole + (-cd * sa).atan2(sd * self.cos_dec0 - cd * self.sin_dec0 * ca).to_degrees();
        let theta = (sd * self.sin_dec0 + cd * self.cos_dec0 * ca).clamp(-1.0, 1.0).asin().to_degrees();
        (phi, theta)
    }

    /// Native spherical to celestial, with unwrapped right ascension.
    fn native_to_celestial(&self, phi: f64, theta: f64) -> (f64, f64) {
        let (st, ct) = theta.to_radians().sin_cos();
        let (sp, cp) = (phi - self.lonpole).to_radians().sin_cos();
        let ra = self.ra0 + (-ct * sp).atan2(st * self.cos_dec0 - ct * self.sin_dec0 * cp).to_degrees();
        let dec = (st * self.sin_dec0 + ct * self.cos_dec0 * cp).clamp(-1.0, 1.0).asin().to_degrees();
        (ra, dec)
    }
}

impl Projection for ZenithalProjection {
    fn direct(&self, celestial: Point) -> Option<Point> {
        let (phi, theta) = self.celestial_to_native(celestial.x, celestial.y);
        let r = self.kind.radius(theta)?;
        let (s, c) = phi.to_radians().sin_cos();
        Some(Point::new(r * s, -r * c))
    }

    fn inverse(&self, native: Point) -> Option<Point> {
        let r = native.x.hypot(native.y);
        let theta = self.kind.theta(r)?;
        let phi = if r == 0.0 { 0.0 } else { native.x.atan2(-native.y).to_degrees() };
        let (ra, dec) = self.native_to_celestial(phi, theta);
        Some(Point::new(ra, dec))
    }

    fn origin(&self) -> Point {
        Point::new(self.ra0, self.dec0)
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn identifier(&self) -> &'static str {
        self.kind.code()
    }

    fn fill_wcs_keywords(&self, wcs: &mut WcsKeywords) {
        wcs.ctype1 = Some(format!("RA---{}", self.kind.code()));
        wcs.ctype2 = Some(format!("DEC--{}", self.kind.code()));
        wcs.crval1 = Some(self.ra0);
        wcs.crval2 = Some(self.dec0);
        wcs.lonpole = Some(self.lonpole);
        wcs.latpole = Some(self.dec0);
    }

    fn clone_box(&self) -> Box<dyn Projection> {
        Box::new(self.clone())
    }
}

/// Projection code of a `CTYPEn` value such as `RA---TAN`.
fn ctype_code(ctype: &str) -> &str {
    ctype.get(5..8).unwrap_or("").trim_end_matches('-')
}

/// Build the projection described by `wcs`. Requires CTYPE1/2 and CRVAL1/2.
pub fn create_projection(wcs: &WcsKeywords) -> Result<Box<dyn Projection>> {
    let ctype1 = wcs
        .ctype1
        .as_deref()
        .ok_or_else(|| Error::Parse("missing CTYPE1".into()))?;
    let ctype2 = wcs
        .ctype2
        .as_deref()
        .ok_or_else(|| Error::Parse("missing CTYPE2".into()))?;
    let code = ctype_code(ctype1);
    if code != ctype_code(ctype2) {
        return Err(Error::Parse(format!(
            "inconsistent projections '{ctype1}' and '{ctype2}'"
        )));
    }
    let kind = ZenithalKind::from_code(code)
        .ok_or_else(|| Error::Parse(format!("unsupported projection '{ctype1}'")))?;
    let ra0 = wcs.crval1.ok_or_else(|| Error::Parse("missing CRVAL1".into()))?;
    let dec0 = wcs.crval2.ok_or_else(|| Error::Parse("missing CRVAL2".into()))?;
    Ok(Box::new(ZenithalProjection::new(kind, ra0, dec0, wcs.lonpole)?))
}

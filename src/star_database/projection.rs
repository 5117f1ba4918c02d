//! Projections of the database trees. All angles in degrees.

use crate::error::{Error, Result};
use crate::geometry::Point;

/// Projection kind of a database tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeProjectionKind {
    Equirectangular,
    AzimuthalEquidistant,
    TransverseEquirectangular,
}

impl TreeProjectionKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "Equirectangular" => Ok(Self::Equirectangular),
            "AzimuthalEquidistant" => Ok(Self::AzimuthalEquidistant),
            "TransverseEquirectangular" => Ok(Self::TransverseEquirectangular),
            other => Err(Error::Parse(format!("unknown tree projection '{other}'"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Equirectangular => "Equirectangular",
            Self::AzimuthalEquidistant => "AzimuthalEquidistant",
            Self::TransverseEquirectangular => "TransverseEquirectangular",
        }
    }
}

/// Projection of a tree about its center `(ra0, dec0)`.
///
/// Equirectangular trees are centered on the equator; the polar projections
/// are centered on a pole and project the absolute declination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeProjection {
    pub kind: TreeProjectionKind,
    pub ra0: f64,
    pub dec0: f64,
}

impl TreeProjection {
    pub fn new(kind: TreeProjectionKind, ra0: f64, dec0: f64) -> Result<Self> {
        if !(0.0..360.0).contains(&ra0) {
            return Err(Error::OutOfRange {
                what: "tree center right ascension",
                value: ra0,
            });
        }
        if !(-90.0..=90.0).contains(&dec0) {
            return Err(Error::OutOfRange {
                what: "tree center declination",
                value: dec0,
            });
        }
        let valid = match kind {
            TreeProjectionKind::Equirectangular => dec0 == 0.0,
            _ => dec0.abs() == 90.0,
        };
        if !valid {
            return Err(Error::CorruptedData(format!(
                "{} tree cannot be centered at declination {dec0}",
                kind.name()
            )));
        }
        Ok(Self { kind, ra0, dec0 })
    }

    fn pole_sign(&self) -> f64 {
        if self.dec0 < 0.0 {
            -1.0
        } else {
            1.0
        }
    }

    /// Celestial to projected coordinates.
    pub fn project(&self, ra: f64, dec: f64) -> Point {
        let dra = ra - self.ra0;
        match self.kind {
            TreeProjectionKind::Equirectangular => Point::new(wrap180(dra), dec),
            TreeProjectionKind::AzimuthalEquidistant => {
                let r = 90.0 - dec.abs();
                let (s, c) = dra.to_radians().sin_cos();
                Point::new(r * s, r * c)
            }
            TreeProjectionKind::TransverseEquirectangular => {
                let (sd, cd) = dec.abs().to_radians().sin_cos();
                let (sa, ca) = dra.to_radians().sin_cos();
                Point::new(
                    (cd * sa).clamp(-1.0, 1.0).asin().to_degrees(),
                    sd.atan2(cd * ca).to_degrees() - 90.0,
                )
            }
        }
    }

    /// Projected to celestial coordinates, with `ra` in `[0, 360)`.
    pub fn unproject(&self, p: Point) -> (f64, f64) {
        let (dra, dec) = match self.kind {
            TreeProjectionKind::Equirectangular => (p.x, p.y),
            TreeProjectionKind::AzimuthalEquidistant => {
                let r = p.x.hypot(p.y);
                (p.x.atan2(p.y).to_degrees(), self.pole_sign() * (90.0 - r))
            }
            TreeProjectionKind::TransverseEquirectangular => {
                let (sx, cx) = p.x.to_radians().sin_cos();
                let (sl, cl) = (p.y + 90.0).to_radians().sin_cos();
                let z = (cx * sl).clamp(-1.0, 1.0);
                (sx.atan2(cx * cl).to_degrees(), self.pole_sign() * z.asin().to_degrees())
            }
        };
        ((dra + self.ra0).rem_euclid(360.0), dec)
    }
}

/// Wrap an angle to `[-180, 180)`.
fn wrap180(a: f64) -> f64 {
    (a + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        let dra = ((a.0 - b.0 + 540.0).rem_euclid(360.0) - 180.0).abs();
        dra < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn center_validation() {
        use TreeProjectionKind::*;
        assert!(TreeProjection::new(Equirectangular, 0.0, 0.0).is_ok());
        assert!(TreeProjection::new(Equirectangular, 0.0, 10.0).is_err());
        assert!(TreeProjection::new(AzimuthalEquidistant, 0.0, -90.0).is_ok());
        assert!(TreeProjection::new(TransverseEquirectangular, 0.0, 45.0).is_err());
        assert!(TreeProjection::new(Equirectangular, 360.0, 0.0).is_err());
    }

    #[test]
    fn projections_invert() {
        use TreeProjectionKind::*;
        let cases = [
            (Equirectangular, 0.0, [(359.5, -12.0), (10.0, 45.0), (180.0, 0.0)]),
            (AzimuthalEquidistant, 90.0, [(10.0, 70.0), (250.0, 89.0), (181.0, 40.0)]),
            (AzimuthalEquidistant, -90.0, [(10.0, -70.0), (300.0, -62.5), (0.0, -85.0)]),
            (TransverseEquirectangular, 90.0, [(10.0, 70.0), (250.0, 89.0), (135.0, 61.0)]),
            (TransverseEquirectangular, -90.0, [(10.0, -70.0), (300.0, -62.5), (0.5, -85.0)]),
        ];
        for (kind, dec0, points) in cases {
            let p = TreeProjection::new(kind, 0.0, dec0).unwrap();
            for (ra, dec) in points {
                let back = p.unproject(p.project(ra, dec));
                assert!(close(back, (ra, dec)), "{kind:?} ({ra}, {dec}) -> {back:?}");
            }
        }
    }

    #[test]
    fn equirectangular_wraps_around_center() {
        let p = TreeProjection::new(TreeProjectionKind::Equirectangular, 0.0, 0.0).unwrap();
        assert!((p.project(358.0, 1.0).x + 2.0).abs() < 1e-12);
        assert!((p.project(2.0, 1.0).x - 2.0).abs() < 1e-12);
    }
}

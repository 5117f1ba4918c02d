//! Cone searches over database trees.

use nalgebra::Vector3;

use crate::error::Result;
use crate::geometry::{Point, Rect};

use super::projection::TreeProjection;

/// Subdivisions of each node edge tested against the cone. Edges of constant
/// declination are small circles, approximated by great-circle segments.
const EDGE_SEGMENTS: usize = 8;

/// Parameters of a cone search. Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub center_ra: f64,
    pub center_dec: f64,
    pub radius: f64,
    pub magnitude_low: f64,
    pub magnitude_high: f64,
    /// Every one of these flags must be set.
    pub required_flags: u32,
    /// At least one of these flags must be set, unless zero.
    pub inclusion_flags: u32,
    /// None of these flags may be set.
    pub exclusion_flags: u32,
    /// Maximum number of returned sources.
    pub source_limit: usize,
}

impl SearchConfig {
    /// Unfiltered search of `radius` degrees about `(ra, dec)`.
    pub fn new(center_ra: f64, center_dec: f64, radius: f64) -> Self {
        Self {
            center_ra,
            center_dec,
            radius,
            magnitude_low: f64::NEG_INFINITY,
            magnitude_high: f64::INFINITY,
            required_flags: 0,
            inclusion_flags: 0,
            exclusion_flags: 0,
            source_limit: usize::MAX,
        }
    }

    pub fn accepts_magnitude(&self, mag: f64) -> bool {
        mag >= self.magnitude_low && mag <= self.magnitude_high
    }

    pub fn accepts_flags(&self, flags: u32) -> bool {
        flags & self.required_flags == self.required_flags
            && (self.inclusion_flags == 0 || flags & self.inclusion_flags != 0)
            && flags & self.exclusion_flags == 0
    }

    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        unit_vector(ra, dec).dot(&self.center()).clamp(-1.0, 1.0).acos().to_degrees() <= self.radius
    }

    fn center(&self) -> Vector3<f64> {
        unit_vector(self.center_ra, self.center_dec)
    }
}

/// Results and counters of a cone search.
#[derive(Debug, Clone)]
pub struct SearchData<T> {
    pub config: SearchConfig,
    pub results: Vec<T>,
    /// Accepted sources dropped by the source limit.
    pub excess_count: usize,
    pub nodes_visited: usize,
    pub leaves_loaded: usize,
}

impl<T> SearchData<T> {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
            excess_count: 0,
            nodes_visited: 0,
            leaves_loaded: 0,
        }
    }

    /// Add an accepted source. Returns `false` if the source limit dropped it.
    pub fn push(&mut self, item: T) -> bool {
        if self.results.len() < self.config.source_limit {
            self.results.push(item);
            true
        } else {
            self.excess_count += 1;
            false
        }
    }

    pub fn is_full(&self) -> bool {
        self.results.len() >= self.config.source_limit
    }
}

/// Decodes the uncompressed contents of a leaf block into search results.
pub trait LeafDecoder {
    type Item;

    /// Emit every source in `block` accepted by `search.config`.
    fn decode_leaf(&self, block: &[u8], search: &mut SearchData<Self::Item>) -> Result<()>;
}

pub(crate) fn unit_vector(ra: f64, dec: f64) -> Vector3<f64> {
    let (sa, ca) = ra.to_radians().sin_cos();
    let (sd, cd) = dec.to_radians().sin_cos();
    Vector3::new(cd * ca, cd * sa, sd)
}

/// Whether a node rectangle of a tree may hold sources inside the cone.
pub(crate) fn node_intersects_cone(projection: &TreeProjection, rect: &Rect, config: &SearchConfig) -> bool {
    let c = config.center();
    let (sin_r, cos_r) = config.radius.min(180.0).to_radians().sin_cos();

    // Center inside the node.
    if rect.includes(projection.project(config.center_ra, config.center_dec)) {
        return true;
    }

    let corners = rect.corners();
    for k in 0..4 {
        let (a, b) = (corners[k], corners[(k + 1) % 4]);
        let mut prev = sky_vector(projection, a);
        for s in 1..=EDGE_SEGMENTS {
            let t = s as f64 / EDGE_SEGMENTS as f64;
            let next = sky_vector(projection, a + (b - a) * t);
            // Vertex inside the cone.
            if prev.dot(&c) >= cos_r {
                return true;
            }
            if segment_within(&prev, &next, &c, sin_r, cos_r) {
                return true;
            }
            prev = next;
        }
    }
    false
}

fn sky_vector(projection: &TreeProjection, p: Point) -> Vector3<f64> {
    let (ra, dec) = projection.unproject(p);
    unit_vector(ra, dec)
}

/// Whether the great-circle segment `a`–`b` passes within the cone: the
/// cross-track distance is below the radius and the foot of the
/// perpendicular lies between the endpoints.
fn segment_within(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>, sin_r: f64, cos_r: f64) -> bool {
    let n = a.cross(b);
    let len = n.norm();
    if len < 1e-15 {
        return false;
    }
    let n = n / len;
    let cross_track = c.dot(&n);
    if cos_r > 0.0 && cross_track.abs() > sin_r {
        return false;
    }
    let foot = c - n * cross_track;
    a.cross(&foot).dot(&n) >= 0.0 && foot.cross(b).dot(&n) >= 0.0 && foot.dot(&(a + b)) > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::star_database::projection::TreeProjectionKind;

    fn equirectangular() -> TreeProjection {
        TreeProjection::new(TreeProjectionKind::Equirectangular, 0.0, 0.0).unwrap()
    }

    #[test]
    fn flag_filters() {
        let mut c = SearchConfig::new(0.0, 0.0, 1.0);
        c.required_flags = 0b0011;
        c.inclusion_flags = 0b1100;
        c.exclusion_flags = 0b1_0000;
        assert!(c.accepts_flags(0b0111));
        assert!(!c.accepts_flags(0b0101));
        assert!(!c.accepts_flags(0b0011));
        assert!(!c.accepts_flags(0b1_0111));
    }

    #[test]
    fn source_limit_counts_excess() {
        let mut c = SearchConfig::new(0.0, 0.0, 1.0);
        c.source_limit = 2;
        let mut s = SearchData::new(c);
        assert!(s.push(1));
        assert!(s.push(2));
        assert!(s.is_full());
        assert!(!s.push(3));
        assert_eq!(s.results, vec![1, 2]);
        assert_eq!(s.excess_count, 1);
    }

    #[test]
    fn cone_node_intersection() {
        let p = equirectangular();
        let node = Rect::new(0.0, 0.0, 10.0, 10.0);
        // Center inside.
        assert!(node_intersects_cone(&p, &node, &SearchConfig::new(5.0, 5.0, 0.1)));
        // Corner inside.
        assert!(node_intersects_cone(&p, &node, &SearchConfig::new(10.5, 10.5, 1.0)));
        // Crossing an edge between tested vertices.
        assert!(node_intersects_cone(&p, &node, &SearchConfig::new(0.625, -0.3, 0.4)));
        assert!(node_intersects_cone(&p, &node, &SearchConfig::new(5.0, 10.6, 0.7)));
        // Disjoint.
        assert!(!node_intersects_cone(&p, &node, &SearchConfig::new(5.0, -2.0, 1.0)));
        assert!(!node_intersects_cone(&p, &node, &SearchConfig::new(200.0, 5.0, 20.0)));
    }

    #[test]
    fn cone_membership() {
        let c = SearchConfig::new(359.5, 0.0, 1.0);
        assert!(c.contains(0.4, 0.0));
        assert!(!c.contains(0.6, 0.0));
    }
}

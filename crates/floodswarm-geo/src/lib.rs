//! Planar geometry used by the floodswarm mission engine.
//!
//! Everything in this crate is pure and deterministic: destination points
//! from bearing/distance, Euclidean distance, convex polygons with
//! containment and centroid queries, and a bounded Voronoi partition
//! computed by half-plane clipping. Randomness lives in the callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coincidence tolerance for distinguishing Voronoi sites, in meters.
const SITE_EPSILON: f64 = 1e-9;

/// Errors emitted by geometry routines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeoError {
    /// The Voronoi input did not contain at least two distinct sites.
    #[error("voronoi requires at least 2 distinct sites, got {0}")]
    DegenerateSites(usize),
    /// A polygon was constructed from fewer than three vertices.
    #[error("polygon requires at least 3 vertices")]
    DegeneratePolygon,
}

/// Planar position in meters within a local east/north frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Euclidean distance between two positions.
#[must_use]
pub fn distance(a: Position, b: Position) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Destination point reached from `origin` along a compass bearing.
///
/// Bearings are radians with 0 pointing north (+y) and increasing
/// clockwise, matching the convention of navigation displays.
#[must_use]
pub fn destination(origin: Position, bearing: f64, dist: f64) -> Position {
    Position::new(origin.x + dist * bearing.sin(), origin.y + dist * bearing.cos())
}

/// Axis-aligned bounding extent used to clip Voronoi cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Square extent centered on `center` with the given half-width.
    #[must_use]
    pub fn centered(center: Position, half_width: f64) -> Self {
        Self {
            min_x: center.x - half_width,
            min_y: center.y - half_width,
            max_x: center.x + half_width,
            max_y: center.y + half_width,
        }
    }

    /// Corner ring in counter-clockwise order.
    #[must_use]
    pub fn corners(&self) -> [Position; 4] {
        [
            Position::new(self.min_x, self.min_y),
            Position::new(self.max_x, self.min_y),
            Position::new(self.max_x, self.max_y),
            Position::new(self.min_x, self.max_y),
        ]
    }

    /// Whether the extent contains `point` (boundary inclusive).
    #[must_use]
    pub fn contains(&self, point: Position) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }
}

/// Convex polygon stored as an open ring (no repeated closing vertex).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Polygon {
    vertices: Vec<Position>,
}

impl Polygon {
    /// Build a polygon from a vertex ring.
    pub fn new(vertices: Vec<Position>) -> Result<Self, GeoError> {
        if vertices.len() < 3 {
            return Err(GeoError::DegeneratePolygon);
        }
        Ok(Self { vertices })
    }

    /// Immutable access to the vertex ring.
    #[must_use]
    pub fn vertices(&self) -> &[Position] {
        &self.vertices
    }

    /// Even-odd ray cast containment test.
    ///
    /// Points exactly on a shared cell boundary may report membership in
    /// either adjacent cell; callers treat boundaries as shared.
    #[must_use]
    pub fn contains(&self, point: Position) -> bool {
        let ring = &self.vertices;
        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let (a, b) = (ring[i], ring[j]);
            if (a.y > point.y) != (b.y > point.y) {
                let t = (point.y - a.y) / (b.y - a.y);
                if point.x < a.x + t * (b.x - a.x) {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Signed shoelace area (positive for counter-clockwise rings).
    #[must_use]
    pub fn area(&self) -> f64 {
        let ring = &self.vertices;
        let mut doubled = 0.0;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            doubled += (ring[j].x + ring[i].x) * (ring[i].y - ring[j].y);
            j = i;
        }
        doubled * 0.5
    }

    /// Area-weighted centroid, falling back to the vertex mean for slivers.
    #[must_use]
    pub fn centroid(&self) -> Position {
        let ring = &self.vertices;
        let area = self.area();
        if area.abs() < SITE_EPSILON {
            let n = ring.len() as f64;
            let (sx, sy) = ring
                .iter()
                .fold((0.0, 0.0), |(sx, sy), v| (sx + v.x, sy + v.y));
            return Position::new(sx / n, sy / n);
        }
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let cross = ring[j].x * ring[i].y - ring[i].x * ring[j].y;
            cx += (ring[j].x + ring[i].x) * cross;
            cy += (ring[j].y + ring[i].y) * cross;
            j = i;
        }
        let scale = 1.0 / (6.0 * area);
        Position::new(cx * scale, cy * scale)
    }
}

/// Compute the bounded Voronoi cell of every site.
///
/// Cell `i` is the extent rectangle clipped against the perpendicular
/// bisector toward every other distinct site, so the result covers the
/// extent and cells are disjoint except on shared boundaries. Returns
/// [`GeoError::DegenerateSites`] when fewer than two distinct sites are
/// supplied; callers are expected to recover.
pub fn voronoi(sites: &[Position], extent: Extent) -> Result<Vec<Polygon>, GeoError> {
    let distinct = distinct_count(sites);
    if distinct < 2 {
        return Err(GeoError::DegenerateSites(distinct));
    }

    let mut cells = Vec::with_capacity(sites.len());
    for (i, &site) in sites.iter().enumerate() {
        let mut ring: Vec<Position> = extent.corners().to_vec();
        for (j, &other) in sites.iter().enumerate() {
            if i == j || distance(site, other) < SITE_EPSILON {
                continue;
            }
            ring = clip_half_plane(&ring, site, other);
            if ring.len() < 3 {
                break;
            }
        }
        cells.push(Polygon::new(ring)?);
    }
    Ok(cells)
}

fn distinct_count(sites: &[Position]) -> usize {
    let mut distinct: Vec<Position> = Vec::with_capacity(sites.len());
    for &site in sites {
        if distinct.iter().all(|&seen| distance(seen, site) >= SITE_EPSILON) {
            distinct.push(site);
        }
    }
    distinct.len()
}

/// Sutherland-Hodgman clip of `ring` against the half-plane of points at
/// least as close to `keep` as to `discard`.
fn clip_half_plane(ring: &[Position], keep: Position, discard: Position) -> Vec<Position> {
    // Signed evaluation: negative (or zero) on the `keep` side of the
    // perpendicular bisector.
    let eval = |p: Position| -> f64 {
        let nx = discard.x - keep.x;
        let ny = discard.y - keep.y;
        let offset = (discard.x * discard.x + discard.y * discard.y
            - keep.x * keep.x
            - keep.y * keep.y)
            * 0.5;
        nx * p.x + ny * p.y - offset
    };

    let mut clipped = Vec::with_capacity(ring.len() + 1);
    let mut prev = ring[ring.len() - 1];
    let mut prev_side = eval(prev);
    for &current in ring {
        let side = eval(current);
        if prev_side <= 0.0 {
            clipped.push(prev);
        }
        if (prev_side <= 0.0) != (side <= 0.0) {
            let t = prev_side / (prev_side - side);
            clipped.push(Position::new(
                prev.x + t * (current.x - prev.x),
                prev.y + t * (current.y - prev.y),
            ));
        }
        prev = current;
        prev_side = side;
    }
    clipped
}

//! Geometry toolkit for boundary comparison.
//!
//! Everything operates on WGS84 (longitude, latitude) degree coordinates and
//! returns metric (metre / square-metre) measurements via a local
//! equirectangular projection around the geometry being measured.  Boolean
//! operations run on coordinates truncated to 6 decimal places; the underlying
//! boolean engine can panic on degenerate rings, which this crate catches and
//! surfaces as [`GeomError::Degenerate`] so a single bad parcel stays a
//! data-row error.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use geo::{Area, BooleanOps, BoundingRect, Centroid, HaversineDistance, Translate};
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon, Rect};

mod index;

pub use index::BboxIndex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Metres per degree of latitude (WGS84, mid-latitudes).
pub const METERS_PER_DEGREE_LAT: f64 = 110_574.0;

/// Metres per degree of longitude at the equator; scale by cos(latitude).
const METERS_PER_DEGREE_LNG_EQUATOR: f64 = 111_320.0;

/// Metres per degree of longitude at the given latitude.
pub fn meters_per_degree_lng(lat_deg: f64) -> f64 {
    METERS_PER_DEGREE_LNG_EQUATOR * lat_deg.to_radians().cos()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum GeomError {
    /// Fewer than four vertices (a closed triangle) in the exterior ring.
    TooFewVertices(usize),
    /// First and last vertex differ; boundary rings must be closed.
    OpenRing,
    /// The GeoJSON geometry is not a simple polygon (e.g. a MultiPolygon).
    NotAPolygon(String),
    /// The boolean engine rejected the input (degenerate ring, self-touch).
    Degenerate(String),
    /// A geometry operation produced nothing to measure.
    Empty,
}

impl fmt::Display for GeomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeomError::TooFewVertices(n) => write!(f, "ring has too few vertices: {n}"),
            GeomError::OpenRing => write!(f, "ring is not closed"),
            GeomError::NotAPolygon(kind) => write!(f, "geometry is not a simple polygon: {kind}"),
            GeomError::Degenerate(msg) => write!(f, "degenerate geometry: {msg}"),
            GeomError::Empty => write!(f, "empty geometry"),
        }
    }
}

impl std::error::Error for GeomError {}

// ---------------------------------------------------------------------------
// Coordinate precision
// ---------------------------------------------------------------------------

/// Truncate (toward zero) to `dp` decimal places.
pub fn truncate_dp(v: f64, dp: u32) -> f64 {
    let k = 10f64.powi(dp as i32);
    (v * k).trunc() / k
}

/// Round half-away-from-zero to `dp` decimal places.
pub fn round_dp(v: f64, dp: u32) -> f64 {
    let k = 10f64.powi(dp as i32);
    (v * k).round() / k
}

/// Copy of `poly` with every coordinate truncated to 6 decimal places, the
/// precision fed to boolean operations.
pub fn truncate_polygon_6dp(poly: &Polygon<f64>) -> Polygon<f64> {
    map_coords(poly, |c| Coord {
        x: truncate_dp(c.x, 6),
        y: truncate_dp(c.y, 6),
    })
}

fn map_coords(poly: &Polygon<f64>, f: impl Fn(Coord<f64>) -> Coord<f64> + Copy) -> Polygon<f64> {
    let ext = LineString::new(poly.exterior().0.iter().map(|c| f(*c)).collect());
    let ints = poly
        .interiors()
        .iter()
        .map(|r| LineString::new(r.0.iter().map(|c| f(*c)).collect()))
        .collect();
    Polygon::new(ext, ints)
}

// ---------------------------------------------------------------------------
// Construction / GeoJSON conversion
// ---------------------------------------------------------------------------

/// Build a polygon from a closed exterior ring of `(lng, lat)` pairs.
pub fn polygon_from_ring(ring: &[(f64, f64)]) -> Result<Polygon<f64>, GeomError> {
    if ring.len() < 4 {
        return Err(GeomError::TooFewVertices(ring.len()));
    }
    let first = ring[0];
    let last = ring[ring.len() - 1];
    if first != last {
        return Err(GeomError::OpenRing);
    }
    Ok(Polygon::new(
        LineString::from(ring.to_vec()),
        Vec::new(),
    ))
}

/// Convert a GeoJSON geometry value into a simple polygon.
///
/// MultiPolygons (and anything else) are rejected with
/// [`GeomError::NotAPolygon`]; the reconciler maps that to a `Fail`
/// classification rather than guessing at ring splitting.
pub fn polygon_from_geojson(value: &geojson::Value) -> Result<Polygon<f64>, GeomError> {
    match value {
        geojson::Value::Polygon(rings) => {
            if rings.is_empty() {
                return Err(GeomError::Empty);
            }
            let mut lines: Vec<LineString<f64>> = Vec::with_capacity(rings.len());
            for ring in rings {
                let coords: Vec<Coord<f64>> = ring
                    .iter()
                    .filter(|pos| pos.len() >= 2)
                    .map(|pos| Coord { x: pos[0], y: pos[1] })
                    .collect();
                if coords.len() < 4 {
                    return Err(GeomError::TooFewVertices(coords.len()));
                }
                lines.push(LineString::new(coords));
            }
            let exterior = lines.remove(0);
            Ok(Polygon::new(exterior, lines))
        }
        other => Err(GeomError::NotAPolygon(type_name(other).to_string())),
    }
}

fn type_name(v: &geojson::Value) -> &'static str {
    match v {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Serialize a polygon as a GeoJSON `Polygon` geometry (`serde_json` value),
/// the representation persisted in the `geojson` columns.
pub fn polygon_to_geojson(poly: &Polygon<f64>) -> serde_json::Value {
    let mut rings: Vec<Vec<[f64; 2]>> = Vec::with_capacity(1 + poly.interiors().len());
    rings.push(poly.exterior().0.iter().map(|c| [c.x, c.y]).collect());
    for interior in poly.interiors() {
        rings.push(interior.0.iter().map(|c| [c.x, c.y]).collect());
    }
    serde_json::json!({ "type": "Polygon", "coordinates": rings })
}

/// Exterior ring vertices as `(lng, lat)` pairs, used for vertex-wise
/// comparison in the classifier.
pub fn exterior_ring(poly: &Polygon<f64>) -> Vec<(f64, f64)> {
    poly.exterior().0.iter().map(|c| (c.x, c.y)).collect()
}

// ---------------------------------------------------------------------------
// Metric measurements
// ---------------------------------------------------------------------------

fn local_origin(poly: &Polygon<f64>) -> Coord<f64> {
    poly.exterior()
        .0
        .first()
        .copied()
        .unwrap_or(Coord { x: 0.0, y: 0.0 })
}

/// Project into a local metre frame around `origin` (equirectangular).
/// Adequate for parcel-scale geometry; error is negligible below a few km.
fn to_local_meters(poly: &Polygon<f64>, origin: Coord<f64>) -> Polygon<f64> {
    let k_lng = meters_per_degree_lng(origin.y);
    map_coords(poly, |c| Coord {
        x: (c.x - origin.x) * k_lng,
        y: (c.y - origin.y) * METERS_PER_DEGREE_LAT,
    })
}

/// Polygon area in square metres.
pub fn area_sqm(poly: &Polygon<f64>) -> f64 {
    let origin = local_origin(poly);
    to_local_meters(poly, origin).unsigned_area()
}

fn multi_area_sqm(mp: &MultiPolygon<f64>, origin: Coord<f64>) -> f64 {
    mp.0.iter()
        .map(|p| to_local_meters(p, origin).unsigned_area())
        .sum()
}

/// Intersection, union and symmetric-difference areas (m²) of two polygons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapAreas {
    pub intersection_sqm: f64,
    pub union_sqm: f64,
    pub sym_difference_sqm: f64,
}

impl OverlapAreas {
    /// `intersection / union × 100`, or 0 when the union is empty.
    pub fn percentage_intersect(&self) -> f64 {
        if self.union_sqm <= 0.0 {
            0.0
        } else {
            self.intersection_sqm / self.union_sqm * 100.0
        }
    }
}

/// Compute overlap areas of two polygons via the boolean engine.
///
/// Inputs are truncated to 6 decimal places first; a panic inside the engine
/// is caught and returned as [`GeomError::Degenerate`].
pub fn overlap_areas(old: &Polygon<f64>, new: &Polygon<f64>) -> Result<OverlapAreas, GeomError> {
    let a = truncate_polygon_6dp(old);
    let b = truncate_polygon_6dp(new);
    let origin = local_origin(&a);

    let (inter, union, xor) = guard_boolean(|| {
        let inter = a.intersection(&b);
        let union = a.union(&b);
        let xor = a.xor(&b);
        (inter, union, xor)
    })?;

    Ok(OverlapAreas {
        intersection_sqm: multi_area_sqm(&inter, origin),
        union_sqm: multi_area_sqm(&union, origin),
        sym_difference_sqm: multi_area_sqm(&xor, origin),
    })
}

/// Symmetric difference of two polygons as raw geometry (for the
/// merge/segment analysis), 6-dp truncated, panic-guarded.
pub fn sym_difference(
    old: &Polygon<f64>,
    new: &Polygon<f64>,
) -> Result<MultiPolygon<f64>, GeomError> {
    let a = truncate_polygon_6dp(old);
    let b = truncate_polygon_6dp(new);
    guard_boolean(|| a.xor(&b))
}

/// Intersection of two polygons as raw geometry, 6-dp truncated,
/// panic-guarded.
pub fn intersection(
    a: &Polygon<f64>,
    b: &Polygon<f64>,
) -> Result<MultiPolygon<f64>, GeomError> {
    let ta = truncate_polygon_6dp(a);
    let tb = truncate_polygon_6dp(b);
    guard_boolean(|| ta.intersection(&tb))
}

/// Does the pair overlap with positive area?  Bounding boxes are checked
/// first so disjoint candidates never reach the boolean engine.
pub fn overlaps(a: &Polygon<f64>, b: &Polygon<f64>) -> Result<bool, GeomError> {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => {
            if !rects_intersect(&ra, &rb) {
                return Ok(false);
            }
        }
        _ => return Ok(false),
    }
    let areas = overlap_areas(a, b)?;
    Ok(areas.intersection_sqm > 0.0)
}

fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

fn guard_boolean<T>(f: impl FnOnce() -> T) -> Result<T, GeomError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "boolean op panicked".to_string());
        GeomError::Degenerate(msg)
    })
}

/// Centroid of a polygon in degree space.
pub fn centroid(poly: &Polygon<f64>) -> Result<Point<f64>, GeomError> {
    poly.centroid().ok_or(GeomError::Empty)
}

/// Great-circle distance in metres between two `(lng, lat)` points.
pub fn distance_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

// ---------------------------------------------------------------------------
// Erosion
// ---------------------------------------------------------------------------

/// Shrink a polygon inward by `distance_m` metres (approximate morphological
/// erosion).
///
/// `geo` carries no polygon buffer, so this intersects eight copies of the
/// polygon, each translated by `distance_m` in a compass direction.  The
/// result under-erodes concave corners slightly, which is acceptable for its
/// only use: filtering thin edge artefacts out of a symmetric difference.
/// Returns an empty MultiPolygon when the polygon erodes away entirely.
pub fn erode(poly: &Polygon<f64>, distance_m: f64) -> Result<MultiPolygon<f64>, GeomError> {
    if distance_m <= 0.0 {
        return Ok(MultiPolygon::new(vec![poly.clone()]));
    }
    let origin = local_origin(poly);
    let dy_deg = distance_m / METERS_PER_DEGREE_LAT;
    let dx_deg = distance_m / meters_per_degree_lng(origin.y);

    let base = truncate_polygon_6dp(poly);
    guard_boolean(|| {
        let mut acc = MultiPolygon::new(vec![base.clone()]);
        for step in 0..8 {
            let theta = std::f64::consts::FRAC_PI_4 * step as f64;
            let shifted = base.translate(dx_deg * theta.cos(), dy_deg * theta.sin());
            acc = acc.intersection(&MultiPolygon::new(vec![shifted]));
            if acc.0.is_empty() {
                break;
            }
        }
        acc
    })
}

/// Sub-polygons of `mp` whose area is at least `min_sqm` (sliver filter).
pub fn drop_slivers(mp: &MultiPolygon<f64>, min_sqm: f64) -> Vec<Polygon<f64>> {
    mp.0.iter()
        .filter(|p| area_sqm(p) >= min_sqm)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Classification thresholds.
//!
//! These values are load-bearing: changing any of them changes which monthly
//! boundary updates are accepted without review.

/// Vertex equality tolerance, degrees (~11 cm at UK latitudes).
pub const COORD_EPS_DEG: f64 = 1e-6;

/// Per-axis mean-offset ceiling for a uniform reprojection, degrees (~13 m).
pub const OFFSET_MEAN_MAX_DEG: f64 = 1e-4;

/// Per-axis standard-deviation ceiling for a rigid-body shift, degrees.
pub const OFFSET_STD_MAX_DEG: f64 = 5e-8;

/// Minimum intersection/union percentage for high-overlap acceptance.
pub const PERCENT_INTERSECT_MIN: f64 = 95.0;

/// Maximum symmetric-difference area for high-overlap acceptance, m².
pub const ABS_DIFF_MAX_SQM: f64 = 100.0;

/// Sub-polygons of a symmetric difference below this area are slivers left
/// behind by the boolean engine, not real territory, m².
pub const ZERO_AREA_SQM: f64 = 2.0;

/// Maximum distance between a geocoded title address and the new polygon's
/// centroid for the `Moved` tag, metres.
pub const MOVED_DISTANCE_MAX_M: f64 = 50.0;

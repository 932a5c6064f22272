//! The polygon reconciler.
//!
//! Walks the pending table in primary-key order from the ledger cursor,
//! classifies each polygon against the accepted boundary with the same id,
//! applies the accept/reject policy (including merge/segment side effects
//! when the gated cascade is enabled), and — on a full, promoting run —
//! bulk-promotes accepted rows into the serving table.
//!
//! The classifier itself ([`cad_match`]) is pure; everything with I/O in it
//! (database reads, geocoding, the analysis artifacts on disk) lives here.

pub mod analysis;
pub mod geocode;
pub mod policy;
pub mod stats;
pub mod sticky;
pub mod task;

pub use geocode::{GeocodeError, Geocoder, HttpGeocoder, NullGeocoder};
pub use sticky::CouncilOffsets;
pub use task::{run_polygon_reconcile, PolygonReconcileArgs, ReconcileReport};

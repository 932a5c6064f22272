//! Boundary match classification.
//!
//! Deterministic, pure logic. No I/O, no database, no geocoder calls.
//!
//! The classifier compares a newly published polygon against the accepted
//! boundary with the same identifier and produces a verdict the reconciler
//! turns into an accept/reject decision:
//!
//! - `classify` runs the primary cascade (exact match, uniform offset,
//!   overlap).  A zero-intersection pair comes back as [`Verdict::Disjoint`];
//!   the caller resolves it to `Moved` or `Fail` with
//!   [`moved::within_moved_distance`], because geocoding is I/O and does not
//!   belong here.
//! - `segmentation::analyse` is the merge/segment cascade for pairs the
//!   primary cascade could not accept.  It is runtime-gated
//!   ([`segmentation::SegmentationConfig`], default off) to mirror the live
//!   configuration; when disabled the reconciler records `Fail`.

mod classify;
pub mod consts;
pub mod moved;
pub mod segmentation;

pub use classify::{classify, Comparison, MatchError, Verdict};

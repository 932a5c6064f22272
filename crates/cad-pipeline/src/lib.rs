//! Pipeline orchestration.
//!
//! One logical worker runs the three tasks in registry order against a
//! durable Run Ledger row.  Starting is race-free (the ledger's partial
//! unique index arbitrates), resumption re-enters each task at its last
//! checkpoint, and the stall discipline steps over a pending row that has
//! crashed the reconcile loop repeatedly.

pub mod notify;
pub mod runner;

pub use notify::Notifier;
pub use runner::{Pipeline, StartOutcome};

/// Consecutive resumes allowed to stall at the same pending row before that
/// row is skipped.
pub const MAX_STALLED_RESUMES: i32 = 3;

//! Corporate-ownership ingestion (CCOD / OCOD).
//!
//! Three layers, read side to write side:
//!
//! - [`catalogue`] — the upstream JSON catalogue boundary: a trait, its wire
//!   DTOs, and a reqwest implementation with retry/backoff.  No CSV logic, no
//!   database logic.
//! - [`change_file`] — streaming CSV parsing of monthly snapshot and
//!   change-only files into [`cad_db::OwnershipRecord`] values, bucketing
//!   additions and deletions.
//! - [`updater`] — the pipeline task: applies the Nov 2017 full snapshot on
//!   first run, then every change file newer than the ledger's
//!   `latest_ownership_data` in strict publication-date order.

pub mod catalogue;
pub mod change_file;
pub mod updater;

pub use catalogue::{
    CatalogueError, ChangeFileKind, ChangeFileMeta, HttpCatalogue, OwnershipCatalogue,
};
pub use change_file::{parse_change_file, parse_snapshot_file, ChangeSet};
pub use updater::{run_ownership_update, OwnershipUpdateArgs, OwnershipUpdateReport};

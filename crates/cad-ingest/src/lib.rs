//! Council polygon ingestion.
//!
//! Per council: download the zipped GML archive from the public index,
//! reproject to WGS84 GeoJSON via the external geospatial toolchain, and
//! stream features into the pending table in bounded chunks.  Every council
//! completion is checkpointed to the Run Ledger so a crashed import resumes
//! at the next council (the partially imported one converges because pending
//! rows upsert by `poly_id`).

use std::fmt;

pub mod archive;
pub mod download;
pub mod index;
pub mod publish_month;
pub mod reproject;
pub mod stream;
pub mod task;

pub use download::ArchiveDownloader;
pub use index::CouncilArchive;
pub use publish_month::{latest_publish_month, today_in_london, PublishMonth};
pub use task::{run_polygon_ingest, IngestReport, PolygonIngestArgs};

/// Minimum plausible feature count for a council; anything lower means the
/// transform produced garbage and the run must fail rather than serve it.
pub const MIN_COUNCIL_FEATURES: u64 = 100;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum IngestError {
    /// Today is the first Sunday of the month: the upstream is publishing and
    /// a run now risks a half-updated dataset.
    PublishDay,
    /// The archive index page could not be fetched or yielded no councils.
    Index(String),
    /// Archive download failed after retries.
    Download(String),
    /// Zip extraction failed (truncated or malformed archive).
    Archive(String),
    /// The reprojection subprocess exited non-zero or is missing.
    Reproject(String),
    /// The transformed output is implausibly small.
    ImplausibleOutput { path: String, size: u64 },
    /// A council produced fewer features than [`MIN_COUNCIL_FEATURES`].
    TooFewFeatures { council: String, count: u64 },
    Io(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::PublishDay => {
                write!(f, "refusing to run on the first Sunday of the month (publish day)")
            }
            IngestError::Index(msg) => write!(f, "archive index error: {msg}"),
            IngestError::Download(msg) => write!(f, "archive download error: {msg}"),
            IngestError::Archive(msg) => write!(f, "archive extraction error: {msg}"),
            IngestError::Reproject(msg) => write!(f, "reprojection error: {msg}"),
            IngestError::ImplausibleOutput { path, size } => {
                write!(f, "transformed output implausibly small ({size} bytes): {path}")
            }
            IngestError::TooFewFeatures { council, count } => {
                write!(f, "council '{council}' produced only {count} features")
            }
            IngestError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e.to_string())
    }
}

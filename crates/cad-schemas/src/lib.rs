//! Shared domain types for the CadDesk pipeline.
//!
//! Everything here is plain data: serde-friendly enums and option structs that
//! cross crate boundaries (ledger rows, HTTP query options, classifier tags).
//! No I/O, no geometry, no SQL.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MatchType
// ---------------------------------------------------------------------------

/// The classifier's verdict on a pending polygon, persisted in
/// `pending_boundaries.match_type` and surfaced in the analysis output.
///
/// `Fail` is the only non-accepting tag; everything else marks the pending row
/// `accepted = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    ExactOffset,
    HighOverlap,
    BoundariesShifted,
    Moved,
    Merged,
    MergedIncomplete,
    Segmented,
    SegmentedIncomplete,
    MergedAndSegmented,
    /// A sibling pending polygon identified while segmenting another boundary.
    NewSegment,
    NewBoundary,
    Fail,
}

impl MatchType {
    pub const ALL: [MatchType; 13] = [
        MatchType::Exact,
        MatchType::ExactOffset,
        MatchType::HighOverlap,
        MatchType::BoundariesShifted,
        MatchType::Moved,
        MatchType::Merged,
        MatchType::MergedIncomplete,
        MatchType::Segmented,
        MatchType::SegmentedIncomplete,
        MatchType::MergedAndSegmented,
        MatchType::NewSegment,
        MatchType::NewBoundary,
        MatchType::Fail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "Exact",
            MatchType::ExactOffset => "ExactOffset",
            MatchType::HighOverlap => "HighOverlap",
            MatchType::BoundariesShifted => "BoundariesShifted",
            MatchType::Moved => "Moved",
            MatchType::Merged => "Merged",
            MatchType::MergedIncomplete => "MergedIncomplete",
            MatchType::Segmented => "Segmented",
            MatchType::SegmentedIncomplete => "SegmentedIncomplete",
            MatchType::MergedAndSegmented => "MergedAndSegmented",
            MatchType::NewSegment => "NewSegment",
            MatchType::NewBoundary => "NewBoundary",
            MatchType::Fail => "Fail",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        MatchType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow!("invalid match type: {}", s))
    }

    /// True for every tag that marks the pending row accepted.
    pub fn is_accepting(&self) -> bool {
        !matches!(self, MatchType::Fail)
    }
}

// ---------------------------------------------------------------------------
// PipelineTask
// ---------------------------------------------------------------------------

/// The three pipeline tasks in dependency order.  The Run Ledger records the
/// last completed task by its `as_str` name; resumption re-enters at the next
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineTask {
    OwnershipUpdate,
    PolygonIngest,
    PolygonReconcile,
}

impl PipelineTask {
    /// Registry order. Tasks always run as a contiguous slice of this array.
    pub const ALL: [PipelineTask; 3] = [
        PipelineTask::OwnershipUpdate,
        PipelineTask::PolygonIngest,
        PipelineTask::PolygonReconcile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineTask::OwnershipUpdate => "ownership",
            PipelineTask::PolygonIngest => "ingest",
            PipelineTask::PolygonReconcile => "reconcile",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ownership" => Ok(PipelineTask::OwnershipUpdate),
            "ingest" => Ok(PipelineTask::PolygonIngest),
            "reconcile" => Ok(PipelineTask::PolygonReconcile),
            other => Err(anyhow!("invalid pipeline task: {}", other)),
        }
    }

    /// Position in the registry.
    pub fn index(&self) -> usize {
        PipelineTask::ALL
            .iter()
            .position(|t| t == self)
            .expect("task is in ALL")
    }

    /// The task after this one, if any.
    pub fn next(&self) -> Option<PipelineTask> {
        PipelineTask::ALL.get(self.index() + 1).copied()
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Ledger row status while a run is alive.  A finished run (success or
/// failure) clears the column to NULL, so "no status" means "not running".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(anyhow!("invalid run status: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Options for one pipeline execution, stored verbatim (as JSON) in the Run
/// Ledger so a resumed run re-installs exactly the options it started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Skip tasks before this one.
    #[serde(default)]
    pub start_at_task: Option<PipelineTask>,
    /// Stop without running this task (exclusive bound).
    #[serde(default)]
    pub stop_before_task: Option<PipelineTask>,
    /// Re-enter an interrupted run at its ledger checkpoints.
    #[serde(default)]
    pub resume: bool,
    /// Promote accepted pending rows into the serving table at the end of the
    /// reconcile task.
    #[serde(default)]
    pub update_boundaries: bool,
    /// Emit per-council intersection/offset histograms into `stats.json`.
    #[serde(default)]
    pub record_stats: bool,
    /// Cap on the number of councils the ingestor processes.
    #[serde(default)]
    pub max_councils: Option<u32>,
    /// Only councils sorting strictly after this name are processed.
    #[serde(default)]
    pub after_council: Option<String>,
    /// Cap on the number of pending polygons the reconciler classifies.
    #[serde(default)]
    pub max_polygons: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_at_task: None,
            stop_before_task: None,
            resume: false,
            update_boundaries: false,
            record_stats: false,
            max_councils: None,
            after_council: None,
            max_polygons: None,
        }
    }
}

impl RunOptions {
    /// A limited run never promotes: promotion requires the whole pending set
    /// to have been classified.
    pub fn is_limited(&self) -> bool {
        self.max_councils.is_some() || self.after_council.is_some() || self.max_polygons.is_some()
    }

    /// True when `task` falls inside the `[start_at_task, stop_before_task)`
    /// window.
    pub fn includes_task(&self, task: PipelineTask) -> bool {
        if let Some(start) = self.start_at_task {
            if task.index() < start.index() {
                return false;
            }
        }
        if let Some(stop) = self.stop_before_task {
            if task.index() >= stop.index() {
                return false;
            }
        }
        true
    }
}

/// Parse the literal strings `"true"` / `"false"` as used by the HTTP query
/// surface.  Anything else (including `"1"`, `"yes"`) is rejected so a typo'd
/// option never silently defaults.
pub fn parse_bool_literal(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Match summary (run notification payload)
// ---------------------------------------------------------------------------

/// Per-tag row counts for a completed reconcile, sent with the completion
/// notification and written to the analysis output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    pub counts: std::collections::BTreeMap<String, u64>,
}

impl MatchSummary {
    pub fn add(&mut self, tag: MatchType, n: u64) {
        *self.counts.entry(tag.as_str().to_string()).or_insert(0) += n;
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Fixed-width text table for chat notifications.
    pub fn to_table(&self) -> String {
        let mut out = String::from("match type          count\n");
        for (tag, n) in &self.counts {
            out.push_str(&format!("{tag:<20}{n}\n"));
        }
        out.push_str(&format!("{:<20}{}\n", "total", self.total()));
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

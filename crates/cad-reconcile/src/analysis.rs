//! Per-run analysis artifacts.
//!
//! Written under `analysis/<timestamp>_<run-key>/` for human review after a
//! run: which ids got which tag, merge/segment detail, failed matches, and
//! id changes.  Advisory outputs, not contracts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use cad_schemas::{MatchSummary, MatchType};

use crate::stats::StatsCollector;

#[derive(Debug, Clone, Serialize)]
pub struct MergeSegmentEntry {
    pub poly_id: i64,
    pub tag: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub absorbed: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub siblings: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedMatch {
    pub poly_id: i64,
    pub council: String,
    pub reason: String,
    pub percentage_intersect: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdChange {
    /// Pending id that arrived with no accepted counterpart but overlapping
    /// territory — the publisher may have recycled an identifier.
    pub poly_id: i64,
    pub overlapping_accepted: Vec<i64>,
}

/// Accumulates analysis output during a reconcile pass and writes the
/// artifact files at the end.
pub struct AnalysisCollector {
    ids_by_tag: BTreeMap<String, Vec<i64>>,
    merges_and_segments: Vec<MergeSegmentEntry>,
    failed_matches: Vec<FailedMatch>,
    id_changes: Vec<IdChange>,
    pub stats: StatsCollector,
}

impl AnalysisCollector {
    pub fn new(record_stats: bool) -> Self {
        Self {
            ids_by_tag: BTreeMap::new(),
            merges_and_segments: Vec::new(),
            failed_matches: Vec::new(),
            id_changes: Vec::new(),
            stats: StatsCollector::new(record_stats),
        }
    }

    pub fn record_tag(&mut self, poly_id: i64, tag: MatchType) {
        self.ids_by_tag
            .entry(tag.as_str().to_string())
            .or_default()
            .push(poly_id);
    }

    pub fn record_merge_segment(
        &mut self,
        poly_id: i64,
        tag: MatchType,
        absorbed: Vec<i64>,
        siblings: Vec<i64>,
    ) {
        self.merges_and_segments.push(MergeSegmentEntry {
            poly_id,
            tag: tag.as_str().to_string(),
            absorbed,
            siblings,
        });
    }

    pub fn record_failure(
        &mut self,
        poly_id: i64,
        council: &str,
        reason: impl Into<String>,
        percentage_intersect: Option<f64>,
    ) {
        self.failed_matches.push(FailedMatch {
            poly_id,
            council: council.to_string(),
            reason: reason.into(),
            percentage_intersect,
        });
    }

    pub fn record_id_change(&mut self, poly_id: i64, overlapping_accepted: Vec<i64>) {
        self.id_changes.push(IdChange {
            poly_id,
            overlapping_accepted,
        });
    }

    /// Tag counts for the completion notification.
    pub fn summary(&self) -> MatchSummary {
        let mut s = MatchSummary::default();
        for (tag, ids) in &self.ids_by_tag {
            if let Ok(t) = MatchType::parse(tag) {
                s.add(t, ids.len() as u64);
            }
        }
        s
    }

    /// Write all artifact files into `dir` (created if needed).  `stats.json`
    /// is only emitted when the run recorded stats.
    pub fn write_all(self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create analysis dir {}", dir.display()))?;

        let mut written = Vec::new();
        let mut emit = |name: &str, value: serde_json::Value| -> Result<()> {
            let path = dir.join(name);
            let body = serde_json::to_string_pretty(&value).context("serialize analysis json")?;
            std::fs::write(&path, format!("{body}\n"))
                .with_context(|| format!("write {}", path.display()))?;
            written.push(path);
            Ok(())
        };

        emit("ids.json", serde_json::to_value(&self.ids_by_tag)?)?;
        emit(
            "merges-and-segments.json",
            serde_json::to_value(&self.merges_and_segments)?,
        )?;
        emit(
            "failed-matches.json",
            serde_json::to_value(&self.failed_matches)?,
        )?;
        emit(
            "inspire-id-changes.json",
            serde_json::to_value(&self.id_changes)?,
        )?;
        if self.stats.enabled() {
            emit("stats.json", self.stats.into_json())?;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_written_and_stats_gated() {
        let dir = tempfile::tempdir().unwrap();

        let mut c = AnalysisCollector::new(false);
        c.record_tag(1, MatchType::Exact);
        c.record_tag(2, MatchType::Fail);
        c.record_failure(2, "Camden", "no overlap", Some(0.0));
        c.record_id_change(3, vec![10, 11]);

        let summary = c.summary();
        assert_eq!(summary.total(), 2);

        let files = c.write_all(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"ids.json".to_string()));
        assert!(names.contains(&"failed-matches.json".to_string()));
        assert!(
            !names.contains(&"stats.json".to_string()),
            "stats.json only with recordStats"
        );

        let ids: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("ids.json")).unwrap())
                .unwrap();
        assert_eq!(ids["Exact"], serde_json::json!([1]));
    }

    #[test]
    fn stats_emitted_when_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = AnalysisCollector::new(true);
        c.stats.record("Camden", 99.0, None);
        let files = c.write_all(dir.path()).unwrap();
        assert!(files.iter().any(|p| p.ends_with("stats.json")));
    }
}

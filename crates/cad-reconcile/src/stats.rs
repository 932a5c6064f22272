//! Per-council comparison statistics for `stats.json`.
//!
//! Histograms of intersection percentages plus running summaries of the
//! observed offset mean/std.  Advisory output for human review; only
//! collected when the run sets `recordStats`.

use std::collections::BTreeMap;

use serde::Serialize;

/// 5-point histogram buckets: `[0,5) … [95,100), [100,100]`.
const BUCKETS: usize = 21;

#[derive(Debug, Clone, Serialize, Default)]
pub struct OffsetSummary {
    pub samples: u64,
    pub mean_lng_sum: f64,
    pub mean_lat_sum: f64,
    pub std_lng_sum: f64,
    pub std_lat_sum: f64,
    pub max_abs_mean_lng: f64,
    pub max_abs_mean_lat: f64,
}

impl OffsetSummary {
    fn record(&mut self, mean: (f64, f64), std: (f64, f64)) {
        self.samples += 1;
        self.mean_lng_sum += mean.0;
        self.mean_lat_sum += mean.1;
        self.std_lng_sum += std.0;
        self.std_lat_sum += std.1;
        self.max_abs_mean_lng = self.max_abs_mean_lng.max(mean.0.abs());
        self.max_abs_mean_lat = self.max_abs_mean_lat.max(mean.1.abs());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CouncilStats {
    /// `percent_histogram[i]` counts comparisons with intersection in
    /// `[5i, 5i+5)`; the final bucket is exactly 100.
    pub percent_histogram: Vec<u64>,
    pub offsets: OffsetSummary,
}

impl Default for CouncilStats {
    fn default() -> Self {
        Self {
            percent_histogram: vec![0; BUCKETS],
            offsets: OffsetSummary::default(),
        }
    }
}

/// Collects per-council stats over one reconcile pass.
#[derive(Debug, Default)]
pub struct StatsCollector {
    enabled: bool,
    councils: BTreeMap<String, CouncilStats>,
}

impl StatsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            councils: BTreeMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(
        &mut self,
        council: &str,
        percentage_intersect: f64,
        offset: Option<((f64, f64), (f64, f64))>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = self.councils.entry(council.to_string()).or_default();

        let bucket = if percentage_intersect >= 100.0 {
            BUCKETS - 1
        } else {
            ((percentage_intersect.max(0.0) / 5.0) as usize).min(BUCKETS - 2)
        };
        entry.percent_histogram[bucket] += 1;

        if let Some((mean, std)) = offset {
            entry.offsets.record(mean, std);
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::to_value(&self.councils).expect("stats serialize")
    }
}

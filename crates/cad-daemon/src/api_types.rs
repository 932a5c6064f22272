//! Request/response payloads for the HTTP surface.
//!
//! Query booleans arrive as the literal strings `"true"`/`"false"`; anything
//! else is a 400, never a silent default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cad_db::BoundarySummary;
use cad_schemas::{parse_bool_literal, PipelineTask, RunOptions};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BoundariesParams {
    pub sw_lng: f64,
    pub sw_lat: f64,
    pub ne_lng: f64,
    pub ne_lat: f64,
    /// `all` (default) | `uk` | `overseas`
    #[serde(rename = "type")]
    pub owner_type: Option<String>,
    /// Privileged: `"false"` additionally returns pending rows.
    #[serde(rename = "acceptedOnly")]
    pub accepted_only: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SecretParam {
    pub secret: Option<String>,
}

/// Body of `POST /polygons`.  Field spelling follows the wire contract
/// exactly (`poly_ids` is snake_case, the rest camelCase).
#[derive(Debug, Deserialize)]
pub struct PolygonsBody {
    #[serde(default)]
    pub poly_ids: Option<Vec<i64>>,
    #[serde(default, rename = "searchArea")]
    pub search_area: Option<Value>,
    #[serde(default, rename = "includeLeaseholds")]
    pub include_leaseholds: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(rename = "proprietorName")]
    pub proprietor_name: String,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunPipelineParams {
    #[serde(rename = "startAtTask")]
    pub start_at_task: Option<String>,
    #[serde(rename = "stopBeforeTask")]
    pub stop_before_task: Option<String>,
    pub resume: Option<String>,
    #[serde(rename = "updateBoundaries")]
    pub update_boundaries: Option<String>,
    #[serde(rename = "recordStats")]
    pub record_stats: Option<String>,
    #[serde(rename = "maxCouncils")]
    pub max_councils: Option<String>,
    #[serde(rename = "afterCouncil")]
    pub after_council: Option<String>,
    #[serde(rename = "maxPolygons")]
    pub max_polygons: Option<String>,
    pub secret: Option<String>,
}

impl RunPipelineParams {
    /// Convert the string-typed query options into [`RunOptions`], rejecting
    /// malformed values with a message naming the offending option.
    pub fn to_options(&self) -> Result<RunOptions, String> {
        let flag = |name: &str, v: &Option<String>| -> Result<bool, String> {
            match v {
                None => Ok(false),
                Some(s) => parse_bool_literal(s)
                    .ok_or_else(|| format!("{name} must be the literal \"true\" or \"false\"")),
            }
        };
        let task = |name: &str, v: &Option<String>| -> Result<Option<PipelineTask>, String> {
            match v {
                None => Ok(None),
                Some(s) => PipelineTask::parse(s)
                    .map(Some)
                    .map_err(|_| format!("{name} must be one of ownership|ingest|reconcile")),
            }
        };

        Ok(RunOptions {
            start_at_task: task("startAtTask", &self.start_at_task)?,
            stop_before_task: task("stopBeforeTask", &self.stop_before_task)?,
            resume: flag("resume", &self.resume)?,
            update_boundaries: flag("updateBoundaries", &self.update_boundaries)?,
            record_stats: flag("recordStats", &self.record_stats)?,
            max_councils: self
                .max_councils
                .as_ref()
                .map(|s| s.parse().map_err(|_| "maxCouncils must be an integer".to_string()))
                .transpose()?,
            after_council: self.after_council.clone(),
            max_polygons: self
                .max_polygons
                .as_ref()
                .map(|s| s.parse().map_err(|_| "maxPolygons must be an integer".to_string()))
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub db_ok: bool,
}

#[derive(Debug, Serialize)]
pub struct BoundariesResponse {
    pub boundaries: Vec<BoundarySummary>,
}

#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub started: bool,
    pub unique_key: String,
}

#[derive(Debug, Serialize)]
pub struct BusyResponse {
    pub busy: bool,
    pub unique_key: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunPipelineParams {
        RunPipelineParams {
            start_at_task: None,
            stop_before_task: None,
            resume: None,
            update_boundaries: None,
            record_stats: None,
            max_councils: None,
            after_council: None,
            max_polygons: None,
            secret: None,
        }
    }

    #[test]
    fn defaults_map_to_default_options() {
        let opts = params().to_options().unwrap();
        assert_eq!(opts, RunOptions::default());
    }

    #[test]
    fn literal_booleans_enforced() {
        let mut p = params();
        p.resume = Some("true".into());
        assert!(p.to_options().unwrap().resume);

        p.resume = Some("True".into());
        let err = p.to_options().unwrap_err();
        assert!(err.contains("resume"));

        p.resume = Some("1".into());
        assert!(p.to_options().is_err());
    }

    #[test]
    fn tasks_and_caps_parse() {
        let mut p = params();
        p.start_at_task = Some("ingest".into());
        p.max_polygons = Some("250".into());
        let opts = p.to_options().unwrap();
        assert_eq!(opts.start_at_task, Some(PipelineTask::PolygonIngest));
        assert_eq!(opts.max_polygons, Some(250));

        p.start_at_task = Some("everything".into());
        assert!(p.to_options().is_err());
    }
}

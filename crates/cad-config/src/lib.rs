//! Environment configuration for CadDesk binaries, plus canonical JSON
//! hashing used to derive Run Ledger keys.
//!
//! Binaries call `dotenvy::from_filename(".env.local")` themselves before
//! `AppConfig::from_env()`; this crate only reads the process environment.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

pub const ENV_DB_URL: &str = "CAD_DATABASE_URL";
pub const ENV_HTTP_SECRET: &str = "CAD_HTTP_SECRET";
pub const ENV_OWNERSHIP_API_KEY: &str = "CAD_OWNERSHIP_API_KEY";
pub const ENV_OWNERSHIP_API_URL: &str = "CAD_OWNERSHIP_API_URL";
pub const ENV_INSPIRE_INDEX_URL: &str = "CAD_INSPIRE_INDEX_URL";
pub const ENV_GEOCODER_API_KEY: &str = "CAD_GEOCODER_API_KEY";
pub const ENV_GEOCODER_URL: &str = "CAD_GEOCODER_URL";
pub const ENV_WEBHOOK_URL: &str = "CAD_WEBHOOK_URL";
pub const ENV_BACKUP_DEST: &str = "CAD_BACKUP_DEST";
pub const ENV_DATA_DIR: &str = "CAD_DATA_DIR";
pub const ENV_DAEMON_ADDR: &str = "CAD_DAEMON_ADDR";

/// Production defaults for the public dataset endpoints; overridable for
/// tests and mirrors.
pub const DEFAULT_OWNERSHIP_API_URL: &str =
    "https://use-land-property-data.service.gov.uk/api/v1";
pub const DEFAULT_INSPIRE_INDEX_URL: &str =
    "https://use-land-property-data.service.gov.uk/datasets/inspire/download";
pub const DEFAULT_GEOCODER_URL: &str = "https://api.geoapify.com/v1/geocode/search";

/// Everything a CadDesk process reads from its environment.
///
/// Optional fields gate features: no geocoder key ⇒ the `Moved` fallback is
/// disabled; no webhook ⇒ notifications are silent; no backup destination ⇒
/// the archive backup step is skipped.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub http_secret: Option<String>,
    pub ownership_api_key: Option<String>,
    pub ownership_api_url: String,
    pub inspire_index_url: String,
    pub geocoder_api_key: Option<String>,
    pub geocoder_url: String,
    pub webhook_url: Option<String>,
    pub backup_dest: Option<String>,
    pub data_dir: PathBuf,
    pub daemon_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

        Ok(Self {
            database_url,
            http_secret: env_opt(ENV_HTTP_SECRET),
            ownership_api_key: env_opt(ENV_OWNERSHIP_API_KEY),
            ownership_api_url: env_opt(ENV_OWNERSHIP_API_URL)
                .unwrap_or_else(|| DEFAULT_OWNERSHIP_API_URL.to_string()),
            inspire_index_url: env_opt(ENV_INSPIRE_INDEX_URL)
                .unwrap_or_else(|| DEFAULT_INSPIRE_INDEX_URL.to_string()),
            geocoder_api_key: env_opt(ENV_GEOCODER_API_KEY),
            geocoder_url: env_opt(ENV_GEOCODER_URL)
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            webhook_url: env_opt(ENV_WEBHOOK_URL),
            backup_dest: env_opt(ENV_BACKUP_DEST),
            data_dir: PathBuf::from(env_opt(ENV_DATA_DIR).unwrap_or_else(|| "./data".to_string())),
            daemon_addr: env_opt(ENV_DAEMON_ADDR).unwrap_or_else(|| "127.0.0.1:8777".to_string()),
        })
    }

    // Filesystem areas owned by the running process (§ shared resources).

    pub fn downloads_dir(&self, month: &str) -> PathBuf {
        self.data_dir.join("downloads").join(month)
    }

    pub fn geojson_dir(&self, month: &str) -> PathBuf {
        self.data_dir.join("geojson").join(month)
    }

    pub fn analysis_dir(&self, run_label: &str) -> PathBuf {
        self.data_dir.join("analysis").join(run_label)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON hashing
// ---------------------------------------------------------------------------

/// Canonicalize a JSON value (recursively sorted object keys, compact output)
/// and return its SHA-256 hex digest.
///
/// Used to derive the Run Ledger `unique_key`: hashing the canonical options
/// plus the start timestamp gives a stable, collision-resistant key without a
/// random source.
pub fn canonical_hash(v: &Value) -> String {
    let canonical = canonicalize_json(v);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
pub fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalization_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": true, "y": [3, 2]}});
        let b = json!({"a": {"y": [3, 2], "z": true}, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
        assert_eq!(canonicalize_json(&a), r#"{"a":{"y":[3,2],"z":true},"b":1}"#);
    }

    #[test]
    fn hash_is_order_independent_and_value_sensitive() {
        let a = json!({"resume": true, "maxPolygons": 10});
        let b = json!({"maxPolygons": 10, "resume": true});
        let c = json!({"maxPolygons": 11, "resume": true});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
        assert_ne!(canonical_hash(&a), canonical_hash(&c));
        assert_eq!(canonical_hash(&a).len(), 64);
    }

    #[test]
    fn data_dirs_are_month_scoped() {
        let cfg = AppConfig {
            database_url: "postgres://x".to_string(),
            http_secret: None,
            ownership_api_key: None,
            ownership_api_url: DEFAULT_OWNERSHIP_API_URL.to_string(),
            inspire_index_url: DEFAULT_INSPIRE_INDEX_URL.to_string(),
            geocoder_api_key: None,
            geocoder_url: DEFAULT_GEOCODER_URL.to_string(),
            webhook_url: None,
            backup_dest: None,
            data_dir: PathBuf::from("/srv/cad"),
            daemon_addr: "127.0.0.1:8777".to_string(),
        };
        assert_eq!(
            cfg.downloads_dir("2026-07"),
            PathBuf::from("/srv/cad/downloads/2026-07")
        );
        assert_eq!(
            cfg.geojson_dir("2026-07"),
            PathBuf::from("/srv/cad/geojson/2026-07")
        );
    }
}

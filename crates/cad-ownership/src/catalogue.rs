//! Upstream catalogue boundary for ownership datasets.
//!
//! This module defines **only** the file metadata types, the catalogue trait
//! and its reqwest implementation.  No CSV parsing and no database logic
//! belong here.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Metadata types
// ---------------------------------------------------------------------------

/// Which ownership dataset a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeFileKind {
    /// UK companies (CCOD); rows are `uk_based = true`.
    Ccod,
    /// Overseas companies (OCOD); rows are `uk_based = false`.
    Ocod,
}

impl ChangeFileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFileKind::Ccod => "ccod",
            ChangeFileKind::Ocod => "ocod",
        }
    }

    pub fn uk_based(&self) -> bool {
        matches!(self, ChangeFileKind::Ccod)
    }
}

/// One downloadable file in the upstream catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFileMeta {
    pub kind: ChangeFileKind,
    /// Publication date carried by the file.
    pub published: NaiveDate,
    /// Absolute download URL.
    pub url: String,
    /// True for a full monthly snapshot, false for a change-only file.
    pub full_snapshot: bool,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a catalogue implementation may return.
#[derive(Debug)]
pub enum CatalogueError {
    /// Network or transport failure (retried a bounded number of times).
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { status: u16, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// A required configuration value (API key) is missing or invalid.
    Config(String),
    /// Local filesystem failure while saving a download.
    Io(String),
}

impl fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogueError::Transport(msg) => write!(f, "transport error: {msg}"),
            CatalogueError::Api { status, message } => {
                write!(f, "catalogue api error status={status}: {message}")
            }
            CatalogueError::Decode(msg) => write!(f, "decode error: {msg}"),
            CatalogueError::Config(msg) => write!(f, "config error: {msg}"),
            CatalogueError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogueError {}

// ---------------------------------------------------------------------------
// Catalogue trait
// ---------------------------------------------------------------------------

/// Upstream ownership-dataset catalogue contract.
///
/// Object-safe so the updater holds a `&dyn OwnershipCatalogue`; tests swap
/// in an offline implementation.
#[async_trait]
pub trait OwnershipCatalogue: Send + Sync {
    /// All files the catalogue currently lists for `kind`, newest last.
    async fn list_files(&self, kind: ChangeFileKind)
        -> Result<Vec<ChangeFileMeta>, CatalogueError>;

    /// Download `meta` to `dest` on the local filesystem.
    async fn download_to(
        &self,
        meta: &ChangeFileMeta,
        dest: &Path,
    ) -> Result<(), CatalogueError>;
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogueResponse {
    files: Vec<CatalogueFile>,
}

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    published: NaiveDate,
    url: String,
    #[serde(default)]
    full: bool,
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Catalogue client over the upstream JSON API.
///
/// Retry policy: transport failures and 5xx responses retry up to
/// [`HttpCatalogue::MAX_ATTEMPTS`] with linear backoff; a 429 rate-limit
/// signal sleeps and retries without counting against the attempt budget
/// (the monthly pipeline would rather wait than fail the run).
pub struct HttpCatalogue {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff: Duration,
    rate_limit_pause: Duration,
}

impl HttpCatalogue {
    const MAX_ATTEMPTS: u32 = 3;

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            backoff: Duration::from_secs(5),
            rate_limit_pause: Duration::from_secs(60),
        }
    }

    /// Override retry pacing (tests).
    pub fn with_backoff(mut self, backoff: Duration, rate_limit_pause: Duration) -> Self {
        self.backoff = backoff;
        self.rate_limit_pause = rate_limit_pause;
        self
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, CatalogueError> {
        let mut attempts = 0u32;
        loop {
            let res = self
                .client
                .get(url)
                .header("Authorization", &self.api_key)
                .send()
                .await;

            match res {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    warn!(url, "catalogue rate-limited; pausing before retry");
                    tokio::time::sleep(self.rate_limit_pause).await;
                    // Deliberately not counted: rate limiting is upstream
                    // pushback, not failure.
                }
                Ok(resp) if resp.status().is_server_error() => {
                    attempts += 1;
                    if attempts >= Self::MAX_ATTEMPTS {
                        return Err(CatalogueError::Api {
                            status: resp.status().as_u16(),
                            message: "server error after retries".to_string(),
                        });
                    }
                    tokio::time::sleep(self.backoff * attempts).await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(CatalogueError::Api {
                        status: resp.status().as_u16(),
                        message: resp.text().await.unwrap_or_default(),
                    });
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempts += 1;
                    if attempts >= Self::MAX_ATTEMPTS {
                        return Err(CatalogueError::Transport(e.to_string()));
                    }
                    tokio::time::sleep(self.backoff * attempts).await;
                }
            }
        }
    }
}

#[async_trait]
impl OwnershipCatalogue for HttpCatalogue {
    async fn list_files(
        &self,
        kind: ChangeFileKind,
    ) -> Result<Vec<ChangeFileMeta>, CatalogueError> {
        if self.api_key.is_empty() {
            return Err(CatalogueError::Config(
                "ownership api key is not configured".to_string(),
            ));
        }

        let url = format!("{}/datasets/{}", self.base_url, kind.as_str());
        let resp = self.get_with_retry(&url).await?;
        let body: CatalogueResponse = resp
            .json()
            .await
            .map_err(|e| CatalogueError::Decode(e.to_string()))?;

        debug!(kind = kind.as_str(), files = body.files.len(), "catalogue listed");

        Ok(body
            .files
            .into_iter()
            .map(|f| ChangeFileMeta {
                kind,
                published: f.published,
                url: f.url,
                full_snapshot: f.full,
            })
            .collect())
    }

    async fn download_to(
        &self,
        meta: &ChangeFileMeta,
        dest: &Path,
    ) -> Result<(), CatalogueError> {
        let resp = self.get_with_retry(&meta.url).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CatalogueError::Transport(e.to_string()))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CatalogueError::Io(e.to_string()))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| CatalogueError::Io(e.to_string()))?;
        Ok(())
    }
}

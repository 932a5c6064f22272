//! Archive download through an automated browsing agent.
//!
//! The index host serves a human-oriented page; the downloader behaves like a
//! browser and rotates its identifying header across requests from a small
//! pool so a month-long crawl does not present one fingerprint for 300+
//! councils.

use std::path::Path;
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::Client;
use tracing::{debug, warn};

use crate::IngestError;

/// Browser-identifying header pool; one entry is chosen per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const MAX_ATTEMPTS: u32 = 3;

pub struct ArchiveDownloader {
    client: Client,
    backoff: Duration,
}

impl ArchiveDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("reqwest client build"),
            backoff: Duration::from_secs(10),
        }
    }

    /// Override retry pacing (tests).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn pick_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// Fetch a page of HTML (the archive index).
    pub async fn fetch_text(&self, url: &str) -> Result<String, IngestError> {
        let resp = self.get_with_retry(url).await?;
        resp.text()
            .await
            .map_err(|e| IngestError::Download(e.to_string()))
    }

    /// Download `url` to `dest`, creating parent directories.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, IngestError> {
        let resp = self.get_with_retry(url).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IngestError::Download(e.to_string()))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        debug!(url, dest = %dest.display(), bytes = bytes.len(), "archive saved");
        Ok(bytes.len() as u64)
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, IngestError> {
        let mut attempts = 0u32;
        loop {
            let res = self
                .client
                .get(url)
                .header("User-Agent", Self::pick_agent())
                .send()
                .await;

            // 5xx and 429 are worth retrying; anything else non-success is a
            // hard failure (the index links led somewhere wrong).
            match &res {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(res.expect("checked ok"));
                }
                Ok(resp) if !(resp.status().is_server_error() || resp.status().as_u16() == 429) => {
                    return Err(IngestError::Download(format!(
                        "unexpected status {} for {url}",
                        resp.status()
                    )));
                }
                _ => {}
            }

            attempts += 1;
            if attempts >= MAX_ATTEMPTS {
                let msg = match res {
                    Ok(resp) => format!("status {} for {url}", resp.status()),
                    Err(e) => e.to_string(),
                };
                return Err(IngestError::Download(msg));
            }
            warn!(url, attempts, "download failed; backing off");
            tokio::time::sleep(self.backoff * attempts).await;
        }
    }
}

impl Default for ArchiveDownloader {
    fn default() -> Self {
        Self::new()
    }
}

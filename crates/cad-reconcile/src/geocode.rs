//! Geocoder boundary for the `Moved` fallback.
//!
//! Best effort by design: the reconciler treats any geocoding failure as
//! "no candidates", which resolves a disjoint pair to `Fail` rather than
//! guessing.  The tag is gated on the geocoder key being configured at all
//! ([`NullGeocoder`] stands in when it is not).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use geo_types::Point;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug)]
pub enum GeocodeError {
    Transport(String),
    Api { status: u16, message: String },
    Decode(String),
}

impl fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocodeError::Transport(msg) => write!(f, "transport error: {msg}"),
            GeocodeError::Api { status, message } => {
                write!(f, "geocoder api error status={status}: {message}")
            }
            GeocodeError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for GeocodeError {}

/// External geocoding contract.  Object-safe; tests provide canned results.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Candidate locations for a free-text address, best matches first.
    async fn geocode(&self, address: &str) -> Result<Vec<Point<f64>>, GeocodeError>;

    /// False when geocoding is not configured; the reconciler skips the
    /// `Moved` fallback entirely rather than paying a lookup that cannot
    /// succeed.
    fn enabled(&self) -> bool {
        true
    }
}

/// Stand-in when no geocoder key is configured.
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Vec<Point<f64>>, GeocodeError> {
        Ok(Vec::new())
    }

    fn enabled(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    features: Vec<GeocodeFeature>,
}

#[derive(Debug, Deserialize)]
struct GeocodeFeature {
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    /// (lng, lat)
    coordinates: [f64; 2],
}

/// GeoJSON-speaking geocoder client.
///
/// A 429 sleeps and retries without bound (the upstream will let us through
/// eventually); other failures retry a bounded number of times.
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff: Duration,
    rate_limit_pause: Duration,
}

impl HttpGeocoder {
    const MAX_ATTEMPTS: u32 = 3;

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            backoff: Duration::from_secs(2),
            rate_limit_pause: Duration::from_secs(30),
        }
    }

    /// Override retry pacing (tests).
    pub fn with_backoff(mut self, backoff: Duration, rate_limit_pause: Duration) -> Self {
        self.backoff = backoff;
        self.rate_limit_pause = rate_limit_pause;
        self
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> Result<Vec<Point<f64>>, GeocodeError> {
        let mut attempts = 0u32;
        loop {
            let res = self
                .client
                .get(&self.base_url)
                .query(&[("text", address), ("apiKey", &self.api_key)])
                .send()
                .await;

            match res {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    warn!("geocoder rate-limited; pausing");
                    tokio::time::sleep(self.rate_limit_pause).await;
                }
                Ok(resp) if resp.status().is_success() => {
                    let body: GeocodeResponse = resp
                        .json()
                        .await
                        .map_err(|e| GeocodeError::Decode(e.to_string()))?;
                    return Ok(body
                        .features
                        .into_iter()
                        .map(|f| Point::new(f.geometry.coordinates[0], f.geometry.coordinates[1]))
                        .collect());
                }
                Ok(resp) => {
                    attempts += 1;
                    if attempts >= Self::MAX_ATTEMPTS {
                        return Err(GeocodeError::Api {
                            status: resp.status().as_u16(),
                            message: resp.text().await.unwrap_or_default(),
                        });
                    }
                    tokio::time::sleep(self.backoff * attempts).await;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= Self::MAX_ATTEMPTS {
                        return Err(GeocodeError::Transport(e.to_string()));
                    }
                    tokio::time::sleep(self.backoff * attempts).await;
                }
            }
        }
    }
}

// HttpGeocoder against a local mock server: candidates decode from the
// GeoJSON response shape, and server errors exhaust the bounded retries.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use cad_reconcile::{Geocoder, HttpGeocoder};

fn fast(base: String) -> HttpGeocoder {
    HttpGeocoder::new(base, "key").with_backoff(Duration::ZERO, Duration::ZERO)
}

#[tokio::test]
async fn candidates_decoded_lng_lat() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .query_param("text", "1 High Street, LS1 1AA")
                .query_param("apiKey", "key");
            then.status(200).json_body(json!({
                "features": [
                    { "geometry": { "coordinates": [-1.54, 53.79] } },
                    { "geometry": { "coordinates": [-1.55, 53.80] } }
                ]
            }));
        })
        .await;

    let geocoder = fast(server.base_url());
    let points = geocoder.geocode("1 High Street, LS1 1AA").await.unwrap();
    mock.assert_async().await;

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].x(), -1.54);
    assert_eq!(points[0].y(), 53.79);
}

#[tokio::test]
async fn server_errors_exhaust_bounded_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(500);
        })
        .await;

    let geocoder = fast(server.base_url());
    assert!(geocoder.geocode("anywhere").await.is_err());
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn null_geocoder_is_disabled_and_empty() {
    let g = cad_reconcile::NullGeocoder;
    assert!(!g.enabled());
    assert!(g.geocode("anywhere").await.unwrap().is_empty());
}

// HttpCatalogue against a local mock server: listing decodes the wire shape
// and sends the API key; server errors burn the bounded retry budget;
// downloads land on disk.

use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

use cad_ownership::{CatalogueError, ChangeFileKind, HttpCatalogue, OwnershipCatalogue};

fn fast(base: String) -> HttpCatalogue {
    HttpCatalogue::new(base, "test-key").with_backoff(Duration::ZERO, Duration::ZERO)
}

#[tokio::test]
async fn list_files_decodes_and_authenticates() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/datasets/ccod")
                .header("Authorization", "test-key");
            then.status(200).json_body(json!({
                "files": [
                    { "published": "2017-11-30", "url": format!("{}/ccod_full.csv", server.base_url()), "full": true },
                    { "published": "2024-02-01", "url": format!("{}/ccod_feb.csv", server.base_url()) }
                ]
            }));
        })
        .await;

    let cat = fast(server.base_url());
    let files = cat.list_files(ChangeFileKind::Ccod).await.unwrap();
    mock.assert_async().await;

    assert_eq!(files.len(), 2);
    assert!(files[0].full_snapshot);
    assert!(!files[1].full_snapshot);
    assert_eq!(files[1].published.to_string(), "2024-02-01");
    assert!(files.iter().all(|f| f.kind == ChangeFileKind::Ccod));
}

#[tokio::test]
async fn server_errors_exhaust_bounded_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/datasets/ocod");
            then.status(503);
        })
        .await;

    let cat = fast(server.base_url());
    let err = cat.list_files(ChangeFileKind::Ocod).await.unwrap_err();
    assert!(matches!(err, CatalogueError::Api { status: 503, .. }), "{err}");
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn client_errors_do_not_retry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/datasets/ccod");
            then.status(403).body("bad key");
        })
        .await;

    let cat = fast(server.base_url());
    let err = cat.list_files(ChangeFileKind::Ccod).await.unwrap_err();
    assert!(matches!(err, CatalogueError::Api { status: 403, .. }), "{err}");
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn download_writes_destination_file() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ccod_feb.csv");
            then.status(200).body("Title Number,Change Indicator\nAB1,A\n");
        })
        .await;

    let cat = fast(server.base_url());
    let meta = cad_ownership::ChangeFileMeta {
        kind: ChangeFileKind::Ccod,
        published: chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        url: format!("{}/ccod_feb.csv", server.base_url()),
        full_snapshot: false,
    };

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("dl").join("ccod_feb.csv");
    cat.download_to(&meta, &dest).await.unwrap();

    let body = std::fs::read_to_string(&dest).unwrap();
    assert!(body.contains("AB1,A"));
}

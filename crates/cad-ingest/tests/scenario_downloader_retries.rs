// ArchiveDownloader behaviour against a local mock server: archives land on
// disk, a browser-style identifying header is sent, server errors burn the
// bounded retry budget, and hard client errors fail fast.

use std::time::Duration;

use httpmock::prelude::*;

use cad_ingest::ArchiveDownloader;

#[tokio::test]
async fn archive_saved_with_browser_header() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/Camden.zip")
                .header_exists("User-Agent");
            then.status(200).body(b"PK\x03\x04zipbytes".to_vec());
        })
        .await;

    let dl = ArchiveDownloader::new().with_backoff(Duration::ZERO);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("2026-07").join("Camden.zip");

    let bytes = dl
        .fetch_to_file(&format!("{}/Camden.zip", server.base_url()), &dest)
        .await
        .unwrap();
    mock.assert_async().await;

    assert!(bytes > 0);
    assert!(dest.exists());
}

#[tokio::test]
async fn server_errors_exhaust_bounded_retries() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/index.html");
            then.status(502);
        })
        .await;

    let dl = ArchiveDownloader::new().with_backoff(Duration::ZERO);
    let err = dl
        .fetch_text(&format!("{}/index.html", server.base_url()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("502"), "{err}");
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn not_found_fails_without_retry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/gone.zip");
            then.status(404);
        })
        .await;

    let dl = ArchiveDownloader::new().with_backoff(Duration::ZERO);
    let dir = tempfile::tempdir().unwrap();
    let err = dl
        .fetch_to_file(
            &format!("{}/gone.zip", server.base_url()),
            &dir.path().join("gone.zip"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");
    mock.assert_hits_async(1).await;
}

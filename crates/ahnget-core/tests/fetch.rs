//! Fetcher integration tests against a local HTTP server.

mod fixture;

use ahnget_core::{AhngetError, Fetcher};
use fixture::TestServer;

#[tokio::test]
async fn streams_file_to_disk() {
    let server = TestServer::new(vec![("a.tif", vec![7u8; 100])]).await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("a.tif");

    let fetcher = Fetcher::new().unwrap();
    let written = fetcher
        .fetch(&server.url("a.tif"), &destination, 100, |_| {})
        .await
        .unwrap();

    assert_eq!(written, 100);
    assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 100]);
}

#[tokio::test]
async fn reports_chunks_through_observer() {
    let server = TestServer::new(vec![("a.tif", vec![1u8; 4096])]).await;
    let dir = tempfile::tempdir().unwrap();

    let fetcher = Fetcher::new().unwrap();
    let mut observed: u64 = 0;
    let written = fetcher
        .fetch(&server.url("a.tif"), &dir.path().join("a.tif"), 4096, |n| {
            observed += n;
        })
        .await
        .unwrap();

    assert_eq!(observed, written);
    assert_eq!(observed, 4096);
}

#[tokio::test]
async fn non_success_status_is_a_hard_failure() {
    let server = TestServer::new(Vec::<(String, Vec<u8>)>::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("missing.tif");

    let fetcher = Fetcher::new().unwrap();
    let result = fetcher
        .fetch(&server.url("missing.tif"), &destination, 100, |_| {})
        .await;

    assert!(matches!(result, Err(AhngetError::Server { status: 404, .. })));
    // The status is checked before the destination is created.
    assert!(!destination.exists());
}

#[tokio::test]
async fn index_size_disagreement_is_only_a_warning() {
    let server = TestServer::new(vec![("a.tif", vec![7u8; 100])]).await;
    let dir = tempfile::tempdir().unwrap();

    let fetcher = Fetcher::new().unwrap();
    // Index claims 999 bytes, server serves 100: advisory mismatch,
    // the fetch itself still succeeds.
    let written = fetcher
        .fetch(&server.url("a.tif"), &dir.path().join("a.tif"), 999, |_| {})
        .await
        .unwrap();

    assert_eq!(written, 100);
}

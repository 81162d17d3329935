//! Integration tests for downloading and caching the ratings export.

mod support;

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use ratings_sync::{DatasetError, DatasetFetcher, ImdbId};

use support::ratings_tsv_gz;
use support::socket_guard::start_mock_server_or_skip;

const EXPORT: &str = "/title.ratings.tsv.gz";

#[tokio::test]
async fn test_acquire_downloads_then_reuses_fresh_copy() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(EXPORT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(ratings_tsv_gz(&[("tt0133093", "8.7", 2_100_000)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = DatasetFetcher::with_url(dir.path(), format!("{}{EXPORT}", server.uri())).unwrap();

    let dataset = fetcher.acquire().await.unwrap();
    let rating = dataset.get(&ImdbId::parse("tt0133093").unwrap()).unwrap();
    assert_eq!(rating.score.tenths(), 87);
    assert_eq!(rating.votes, 2_100_000);
    assert!(fetcher.local_path().is_file());

    // Second call is served from disk.
    assert_eq!(fetcher.acquire().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_copy_is_replaced() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(EXPORT))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ratings_tsv_gz(&[
            ("tt0000001", "5.7", 2104),
            ("tt0000002", "6.1", 300),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = DatasetFetcher::with_url(dir.path(), format!("{}{EXPORT}", server.uri()))
        .unwrap()
        .with_max_age(Duration::ZERO);
    std::fs::write(
        fetcher.local_path(),
        ratings_tsv_gz(&[("tt0000009", "1.0", 1)]),
    )
    .unwrap();

    let dataset = fetcher.acquire().await.unwrap();
    assert_eq!(dataset.len(), 2);
    assert!(dataset.get(&ImdbId::parse("tt0000009").unwrap()).is_none());
}

#[tokio::test]
async fn test_http_error_leaves_no_partial_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(EXPORT))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = DatasetFetcher::with_url(dir.path(), format!("{}{EXPORT}", server.uri())).unwrap();

    let err = fetcher.acquire().await.unwrap_err();
    assert!(matches!(err, DatasetError::HttpStatus { status: 500, .. }), "{err}");
    assert!(!fetcher.local_path().exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_corrupt_download_is_reported() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(EXPORT))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not gzip at all".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = DatasetFetcher::with_url(dir.path(), format!("{}{EXPORT}", server.uri())).unwrap();

    let err = fetcher.acquire().await.unwrap_err();
    assert!(matches!(err, DatasetError::Read(_)), "{err}");
}

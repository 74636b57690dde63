//! A `206 Partial Content` reply whose `Content-Range` start disagrees
//! with the existing local file length must be rejected as
//! `FetchError::Protocol` rather than spliced in at the wrong offset.

mod common;

use common::Harness;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn content_range_start_mismatch_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 10-19/20")
                .set_body_bytes(b"0123456789".to_vec()),
        )
        .mount(&server)
        .await;

    let harness = Harness::new(&["--continue", "--robots=false"]);
    let url_str = format!("{}/file.bin", server.uri());
    let url = fetchd::url::Url::parse(&url_str).unwrap();
    let local_path = fetchd::persist::derive_path(&url, &harness.run.args);
    std::fs::create_dir_all(local_path.parent().unwrap()).unwrap();
    std::fs::write(&local_path, b"01234").unwrap(); // 5 bytes already on disk

    harness.run_to_completion(&url_str).await;

    assert_eq!(harness.run.exit_code(), 7, "Protocol exit code expected for a mismatched range start");
    assert_eq!(std::fs::read(&local_path).unwrap(), b"01234", "existing bytes must be left untouched");
}

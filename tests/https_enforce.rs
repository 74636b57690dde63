//! `--https-enforce hard` must reject a plain-HTTP response rather than
//! writing it to disk.

mod common;

use common::Harness;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn hard_enforce_rejects_plain_http_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plaintext body"))
        .mount(&server)
        .await;

    let harness = Harness::new(&["--https-enforce", "hard", "--robots=false"]);
    let url = format!("{}/file.txt", server.uri());
    harness.run_to_completion(&url).await;

    assert_eq!(harness.run.exit_code(), 5, "Tls exit code expected for rejected plain-http response");
    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
    assert!(!harness.path_under(&format!("{host}/file.txt")).exists());
}

#[tokio::test]
async fn soft_enforce_allows_plain_http_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plaintext body"))
        .mount(&server)
        .await;

    let harness = Harness::new(&["--https-enforce", "soft", "--robots=false"]);
    let url = format!("{}/file.txt", server.uri());
    harness.run_to_completion(&url).await;

    assert_eq!(harness.run.exit_code(), 0);
    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
    let written = harness.path_under(&format!("{host}/file.txt"));
    assert_eq!(std::fs::read_to_string(written).unwrap(), "plaintext body");
}

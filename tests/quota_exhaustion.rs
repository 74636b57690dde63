//! A reservation that would cross the run-wide byte quota is rejected
//! without touching disk, while smaller transfers that still fit keep
//! succeeding afterward.

mod common;

use common::Harness;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn oversized_body_is_dropped_without_failing_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/small.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 3]))
        .mount(&server)
        .await;

    let harness = Harness::new(&["--quota", "5", "--robots=false"]);
    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();

    harness.admit(&format!("{}/big.bin", server.uri()));
    harness.admit(&format!("{}/small.bin", server.uri()));
    harness.drain().await;

    assert_eq!(harness.run.exit_code(), 0, "quota overflow is silent, not a run failure");
    assert!(!harness.path_under(&format!("{host}/big.bin")).exists());
    assert!(harness.path_under(&format!("{host}/small.bin")).exists());
    assert_eq!(harness.run.quota.used(), 3);
}

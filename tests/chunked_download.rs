//! `--chunk-size` splits a single range-capable origin into parts and
//! fetches them through the same part machinery as a metalink
//! manifest.

mod common;

use common::Harness;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn large_range_capable_file_is_split_into_chunks() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("HEAD"))
        .and(path("/big.bin"))
        .respond_with(ResponseTemplate::new(200).insert_header("Accept-Ranges", "bytes").insert_header("Content-Length", "20"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .and(header("Range", "bytes=0-"))
        .respond_with(ResponseTemplate::new(206).insert_header("Content-Range", "bytes 0-9/20").set_body_string("abcdefghij"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .and(header("Range", "bytes=10-"))
        .respond_with(ResponseTemplate::new(206).insert_header("Content-Range", "bytes 10-19/20").set_body_string("0123456789"))
        .mount(&server)
        .await;

    let harness = Harness::new(&["--robots=false", "--chunk-size", "10"]);
    harness.run_to_completion(&format!("{base}/big.bin")).await;

    let host = url::Url::parse(&base).unwrap().host_str().unwrap().to_string();
    let assembled = harness.path_under(&format!("{host}/big.bin"));
    assert_eq!(std::fs::read(&assembled).unwrap(), b"abcdefghij0123456789");
    assert_eq!(harness.run.manifests_len(), 0, "chunk manifest is deregistered once every part lands");
}

//! A 401 challenge without usable credentials resolves to
//! `FetchError::AuthRequired` (exit code 6) instead of burning a retry
//! on a request that can't succeed.

mod common;

use common::Harness;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn challenge_without_netrc_is_auth_required() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/private.txt"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="fetchd""#))
        .mount(&server)
        .await;

    let harness = Harness::new(&["--robots=false"]);
    harness.run_to_completion(&format!("{base}/private.txt")).await;

    assert_eq!(harness.run.exit_code(), 6);
    let host = url::Url::parse(&base).unwrap().host_str().unwrap().to_string();
    assert!(!harness.path_under(&format!("{host}/private.txt")).exists());
}

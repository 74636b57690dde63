//! A link admitted before its host's robots.txt has loaded is parked in
//! `deferred_urls` and, once the rules arrive, dropped silently if
//! disallowed rather than ever reaching a worker.

mod common;

use common::Harness;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn disallowed_link_is_deferred_then_dropped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /secret.html\n"))
        .mount(&server)
        .await;

    let index_html = r#"<html><body>
        <a href="/allowed.html">allowed</a>
        <a href="/secret.html">secret</a>
    </body></html>"#;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(index_html),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/allowed.html"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "text/html").set_body_string("ok"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/secret.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(&["--recursive"]);
    harness.run_to_completion(&server.uri()).await;

    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
    assert!(harness.path_under(&format!("{host}/allowed.html")).exists());
    assert!(!harness.path_under(&format!("{host}/secret.html")).exists());
}

//! HTTP connection / transaction logic, layered over `reqwest::Client`.
//! Sends one request and classifies the full response-semantics table
//! rather than just status/Content-Length/Location.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use crate::args::HttpsEnforce;
use crate::dns::{CachingResolver, DnsCache};
use crate::error::FetchError;
use crate::net::NetConfig;
use crate::url::Url;

/// Value-type response the worker operates on (DESIGN NOTES §9):
/// ownership is the worker's frame, dropped at the end of the handler.
pub struct Response {
    pub headers: HashMap<String, Vec<String>>,
    pub body: bytes::Bytes,
    pub meta: ResponseMeta,
}

pub struct ResponseMeta {
    pub code: StatusCode,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub links: Vec<Link>,
    pub challenges: Vec<Challenge>,
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub target: String,
    pub rel: String,
    pub link_type: Option<String>,
    pub priority: u32,
}

#[derive(Debug, Clone)]
pub enum Challenge {
    Basic,
    Digest { realm: Option<String> },
}

/// What the worker should do next, per the response-handling state
/// machine.
pub enum Classification {
    Success,
    PartialContent,
    NotModified,
    Redirect(String),
    MetalinkDescriptor(String),
    AuthRetry,
    Remote4xx5xx,
}

pub fn build_client(net: &NetConfig, dns: Arc<DnsCache>) -> Result<Client, FetchError> {
    let resolver = Arc::new(CachingResolver::new(dns, net.dns_timeout));
    let mut builder = Client::builder()
        .user_agent(net.user_agent.clone())
        .redirect(reqwest::redirect::Policy::none())
        .dns_resolver(resolver)
        .cookie_store(true)
        .gzip(true)
        .deflate(true);
    if let Some(t) = net.connect_timeout {
        builder = builder.connect_timeout(t);
    }
    if let Some(t) = net.read_timeout {
        builder = builder.timeout(t);
    }
    if let Some(proxy_url) = &net.proxy.http_proxy {
        if let Ok(proxy) = reqwest::Proxy::http(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }
    if let Some(proxy_url) = &net.proxy.https_proxy {
        if let Ok(proxy) = reqwest::Proxy::https(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }
    if net.https_only {
        builder = builder.https_only(true);
    }
    builder.build().map_err(FetchError::Http)
}

/// Build request headers per policy: Range, If-Modified-Since,
/// Accept-Encoding, User-Agent, Referer, Authorization.
pub struct RequestPlan {
    pub range_from: Option<u64>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub referer: Option<String>,
    /// `(login, password)` from `.netrc`, applied after a 401 challenge
    /// names Basic — Digest is preferred when offered, but `fetchd`
    /// only satisfies Basic challenges today.
    pub basic_auth: Option<(String, String)>,
}

impl Default for RequestPlan {
    fn default() -> Self {
        RequestPlan {
            range_from: None,
            if_modified_since: None,
            referer: None,
            basic_auth: None,
        }
    }
}

pub fn apply_request_plan(
    mut req: reqwest::RequestBuilder,
    plan: &RequestPlan,
) -> reqwest::RequestBuilder {
    if let Some(from) = plan.range_from {
        req = req.header(header::RANGE, format!("bytes={from}-"));
    }
    if let Some(ims) = plan.if_modified_since {
        req = req.header(header::IF_MODIFIED_SINCE, ims.to_rfc2822());
    }
    if let Some(referer) = &plan.referer {
        req = req.header(header::REFERER, referer.clone());
    }
    if let Some((user, pass)) = &plan.basic_auth {
        req = req.basic_auth(user, Some(pass));
    }
    req
}

/// Perform one HTTP transaction and reduce the `reqwest::Response` into
/// our value-typed `Response` (DESIGN NOTES §9).
pub async fn fetch(client: &Client, url: &Url, plan: &RequestPlan) -> Result<Response, FetchError> {
    let req = client.get(url.as_str());
    let req = apply_request_plan(req, plan);
    let resp = req.send().await.map_err(classify_reqwest_error)?;

    let code = resp.status();
    let content_type = header_str(resp.headers(), header::CONTENT_TYPE);
    let location = header_str(resp.headers(), header::LOCATION);
    let content_length = header_str(resp.headers(), header::CONTENT_LENGTH)
        .and_then(|v| v.parse().ok());
    let last_modified = header_str(resp.headers(), header::LAST_MODIFIED)
        .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
        .map(|d| d.with_timezone(&Utc));
    let content_range = header_str(resp.headers(), header::CONTENT_RANGE)
        .and_then(|v| parse_content_range(&v));
    let links = header_all(resp.headers(), header::LINK)
        .iter()
        .flat_map(|v| parse_link_header(v))
        .collect();
    let challenges = header_all(resp.headers(), header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| parse_challenge(v))
        .collect();
    let retry_after = header_str(resp.headers(), header::RETRY_AFTER)
        .and_then(|v| parse_retry_after(&v));

    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in resp.headers().iter() {
        if let Ok(v) = value.to_str() {
            headers.entry(name.to_string()).or_default().push(v.to_string());
        }
    }

    let body = resp.bytes().await.map_err(classify_reqwest_error)?;

    Ok(Response {
        headers,
        body,
        meta: ResponseMeta {
            code,
            content_type,
            location,
            last_modified,
            content_length,
            content_range,
            links,
            challenges,
            retry_after,
        },
    })
}

/// Parse a `Retry-After` value: either delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = when.signed_duration_since(Utc::now());
    delta.to_std().ok()
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_connect() {
        if is_tls_failure(&e) {
            FetchError::Tls(e.to_string())
        } else {
            FetchError::Connect(e.to_string())
        }
    } else if e.is_timeout() {
        FetchError::Connect(format!("timeout: {e}"))
    } else {
        FetchError::Http(e)
    }
}

/// Walk the error's source chain looking for a genuine certificate or
/// handshake failure underneath a connect error, as opposed to a
/// refused/unreachable connection. reqwest doesn't expose a dedicated
/// accessor for this, so the underlying rustls/webpki error's `Display`
/// is the only stable signal available without depending on rustls
/// directly.
fn is_tls_failure(e: &reqwest::Error) -> bool {
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = cur {
        let msg = err.to_string().to_ascii_lowercase();
        if msg.contains("certificate")
            || msg.contains("unknownissuer")
            || msg.contains("notvalidfor")
            || msg.contains("invalid peer certificate")
            || msg.contains("handshake")
            || msg.contains("tls")
            || msg.contains("ssl")
        {
            return true;
        }
        cur = err.source();
    }
    false
}

/// Classify a response per the response-handling state machine.
pub fn classify(meta: &ResponseMeta, requested_range: bool, had_challenge: bool) -> Classification {
    if let Some(descriptor) = metalink_descriptor(meta) {
        return Classification::MetalinkDescriptor(descriptor);
    }
    match meta.code {
        StatusCode::PARTIAL_CONTENT if requested_range => Classification::PartialContent,
        StatusCode::NOT_MODIFIED => Classification::NotModified,
        StatusCode::UNAUTHORIZED if !had_challenge && !meta.challenges.is_empty() => {
            Classification::AuthRetry
        }
        code if code.is_redirection() && meta.location.is_some() => {
            Classification::Redirect(meta.location.clone().unwrap())
        }
        code if code.is_success() => Classification::Success,
        _ => Classification::Remote4xx5xx,
    }
}

fn metalink_descriptor(meta: &ResponseMeta) -> Option<String> {
    meta.links
        .iter()
        .find(|l| l.rel == "describedby" && l.link_type.as_deref().map(|t| t.contains("metalink")).unwrap_or(false))
        .map(|l| l.target.clone())
}

/// Pick the highest-priority `rel=duplicate` mirror, if any.
pub fn preferred_mirror(meta: &ResponseMeta) -> Option<&Link> {
    meta.links
        .iter()
        .filter(|l| l.rel == "duplicate")
        .max_by_key(|l| l.priority)
}

/// Decide https-enforce policy outcome for a plain-HTTP response under
/// an https-enforcing run.
pub fn https_enforce_outcome(enforce: HttpsEnforce, got_https: bool) -> Result<(), FetchError> {
    if got_https || enforce != HttpsEnforce::Hard {
        Ok(())
    } else {
        Err(FetchError::Tls("https-enforce=hard rejected plain-http response".into()))
    }
}

/// Exponential-flavored backoff with jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(6);
    let jitter_ms: u64 = rand::random::<u64>() % 250;
    base.saturating_mul(factor) + Duration::from_millis(jitter_ms)
}

/// Whether a status is in the retryable set.
pub fn is_retryable_status(code: StatusCode) -> bool {
    matches!(code.as_u16(), 408 | 429 | 503)
}

fn header_str(headers: &reqwest::header::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn header_all(headers: &reqwest::header::HeaderMap, name: header::HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    // "bytes 0-499/1234"
    let rest = value.strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some(ContentRange {
        start: start.parse().ok()?,
        end: end.parse().ok()?,
        total: total.parse().ok()?,
    })
}

fn parse_link_header(value: &str) -> Vec<Link> {
    // Minimal RFC 8288 parsing: "<url>; rel=\"describedby\"; type=\"application/metalink4+xml\""
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (target_part, params_part) = entry.split_once(';')?;
            let target = target_part.trim().trim_start_matches('<').trim_end_matches('>').to_string();
            let mut rel = String::new();
            let mut link_type = None;
            let mut priority = 0;
            for param in params_part.split(';') {
                let param = param.trim();
                if let Some(v) = param.strip_prefix("rel=") {
                    rel = v.trim_matches('"').to_string();
                } else if let Some(v) = param.strip_prefix("type=") {
                    link_type = Some(v.trim_matches('"').to_string());
                } else if let Some(v) = param.strip_prefix("pri=") {
                    priority = v.trim_matches('"').parse().unwrap_or(0);
                }
            }
            if rel.is_empty() {
                None
            } else {
                Some(Link { target, rel, link_type, priority })
            }
        })
        .collect()
}

fn parse_challenge(value: &str) -> Option<Challenge> {
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("digest") {
        let realm = value.find("realm=").map(|i| {
            value[i + 6..]
                .trim_start_matches('"')
                .split('"')
                .next()
                .unwrap_or("")
                .to_string()
        });
        Some(Challenge::Digest { realm })
    } else if lower.starts_with("basic") {
        Some(Challenge::Basic)
    } else {
        None
    }
}

/// Prefer Digest over Basic when both challenges are offered.
pub fn preferred_challenge(challenges: &[Challenge]) -> Option<&Challenge> {
    challenges
        .iter()
        .find(|c| matches!(c, Challenge::Digest { .. }))
        .or_else(|| challenges.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(code: StatusCode) -> ResponseMeta {
        ResponseMeta {
            code,
            content_type: None,
            location: None,
            last_modified: None,
            content_length: None,
            content_range: None,
            links: vec![],
            challenges: vec![],
            retry_after: None,
        }
    }

    #[test]
    fn classifies_2xx_as_success() {
        assert!(matches!(classify(&meta(StatusCode::OK), false, false), Classification::Success));
    }

    #[test]
    fn classifies_206_only_when_range_requested() {
        assert!(matches!(
            classify(&meta(StatusCode::PARTIAL_CONTENT), true, false),
            Classification::PartialContent
        ));
        assert!(matches!(
            classify(&meta(StatusCode::PARTIAL_CONTENT), false, false),
            Classification::Remote4xx5xx
        ));
    }

    #[test]
    fn redirect_requires_location_header() {
        let mut m = meta(StatusCode::FOUND);
        assert!(matches!(classify(&m, false, false), Classification::Remote4xx5xx));
        m.location = Some("http://h/b".into());
        assert!(matches!(classify(&m, false, false), Classification::Redirect(_)));
    }

    #[test]
    fn metalink_link_header_takes_priority_over_redirect() {
        let mut m = meta(StatusCode::FOUND);
        m.location = Some("http://h/b".into());
        m.links.push(Link {
            target: "http://h/a.meta4".into(),
            rel: "describedby".into(),
            link_type: Some("application/metalink4+xml".into()),
            priority: 0,
        });
        assert!(matches!(classify(&m, false, false), Classification::MetalinkDescriptor(_)));
    }

    #[test]
    fn https_enforce_hard_rejects_plain_http() {
        assert!(https_enforce_outcome(HttpsEnforce::Hard, false).is_err());
        assert!(https_enforce_outcome(HttpsEnforce::Hard, true).is_ok());
        assert!(https_enforce_outcome(HttpsEnforce::Soft, false).is_ok());
    }

    #[test]
    fn parses_content_range_header() {
        let cr = parse_content_range("bytes 100-199/1000").unwrap();
        assert_eq!((cr.start, cr.end, cr.total), (100, 199, 1000));
    }

    #[test]
    fn digest_preferred_over_basic() {
        let challenges = vec![Challenge::Basic, Challenge::Digest { realm: None }];
        assert!(matches!(preferred_challenge(&challenges), Some(Challenge::Digest { .. })));
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }

    #[test]
    fn picks_highest_priority_duplicate_mirror() {
        let mut m = meta(StatusCode::OK);
        m.links.push(Link { target: "http://m1/f".into(), rel: "duplicate".into(), link_type: None, priority: 1 });
        m.links.push(Link { target: "http://m2/f".into(), rel: "duplicate".into(), link_type: None, priority: 5 });
        assert_eq!(preferred_mirror(&m).unwrap().target, "http://m2/f");
    }
}

//! Minimal stand-ins for external HTML/CSS/sitemap tokenizers, kept
//! out of scope beyond their output contract. These are small
//! heuristic scanners — not full tokenizers — good enough to produce
//! the contract types in `discovery` for the worker to feed into
//! admission.

use crate::discovery::{CssUrlEvent, HtmlDocument, HtmlLink, SitemapDocument};
use crate::metalink::Manifest;

/// Heuristic extraction of `href="..."`/`src="..."` attributes and a
/// `<meta name="robots" content="nofollow">` check. Real tokenization
/// (entity decoding, malformed-markup recovery) lives in the external
/// parser this stands in for.
pub fn parse_html(body: &str) -> HtmlDocument {
    let mut urls = Vec::new();
    let follow_flag = !body.to_ascii_lowercase().contains(r#"name="robots" content="nofollow""#)
        && !body.to_ascii_lowercase().contains(r#"name='robots' content='nofollow'"#);

    for attr in ["href", "src"] {
        let mut rest = body;
        let needle_dq = format!("{attr}=\"");
        let needle_sq = format!("{attr}='");
        loop {
            let (needle, quote) = if let Some(pos) = rest.find(&needle_dq) {
                (pos, '"')
            } else if let Some(pos) = rest.find(&needle_sq) {
                (pos, '\'')
            } else {
                break;
            };
            let after = &rest[needle + attr.len() + 2..];
            let Some(end) = after.find(quote) else { break };
            let value = &after[..end];
            if !value.is_empty() {
                urls.push(HtmlLink { url: value.to_string(), attr: attr.to_string(), tag: "".to_string() });
            }
            rest = &after[end + 1..];
        }
    }

    let meta_charset = extract_meta_charset(body);

    HtmlDocument {
        base: extract_base_href(body),
        encoding: None,
        follow_flag,
        urls,
        bom: None,
        meta_charset,
        server_hint_charset: None,
        ascii_sniffable: body.is_ascii(),
    }
}

fn extract_base_href(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let base_tag = lower.find("<base ")?;
    let slice = &body[base_tag..];
    let href_pos = slice.to_ascii_lowercase().find("href=")?;
    let after = &slice[href_pos + 5..];
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let after = &after[1..];
    let end = after.find(quote)?;
    Some(after[..end].to_string())
}

fn extract_meta_charset(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let pos = lower.find("charset=")?;
    let after = &body[pos + 8..];
    let trimmed = after.trim_start_matches(['"', '\'']);
    let end = trimmed
        .find(|c: char| c == '"' || c == '\'' || c == ' ' || c == '>')
        .unwrap_or(trimmed.len());
    Some(trimmed[..end].to_string())
}

/// Scan `url(...)` occurrences and the first `@charset` declaration.
pub fn parse_css(body: &str) -> (Vec<CssUrlEvent>, Option<String>) {
    let mut events = Vec::new();
    let mut rest = body;
    let mut base_offset = 0usize;
    while let Some(pos) = rest.find("url(") {
        let after = &rest[pos + 4..];
        if let Some(end) = after.find(')') {
            let raw = after[..end].trim().trim_matches(['"', '\'']);
            if !raw.is_empty() {
                events.push(CssUrlEvent { uri: raw.to_string(), pos: base_offset + pos });
            }
            rest = &after[end + 1..];
            base_offset += pos + 4 + end + 1;
        } else {
            break;
        }
    }
    let charset = body.find("@charset").and_then(|pos| {
        let after = &body[pos + "@charset".len()..];
        let trimmed = after.trim_start().trim_start_matches(['"', '\'']);
        let end = trimmed.find(|c: char| c == '"' || c == '\'' || c == ';')?;
        Some(trimmed[..end].to_string())
    });
    (events, charset)
}

/// Distinguish a sitemap index (`<sitemapindex>`) from a urlset
/// (`<urlset>`) and extract every `<loc>` entry accordingly.
pub fn parse_sitemap(body: &str) -> SitemapDocument {
    let is_index = body.contains("<sitemapindex");
    let locs = extract_locs(body);
    if is_index {
        SitemapDocument { index_urls: locs, content_urls: vec![] }
    } else {
        SitemapDocument { index_urls: vec![], content_urls: locs }
    }
}

fn extract_locs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(pos) = rest.find("<loc>") {
        let after = &rest[pos + 5..];
        let Some(end) = after.find("</loc>") else { break };
        out.push(after[..end].trim().to_string());
        rest = &after[end + 6..];
    }
    out
}

/// Deserialize a fetched metalink descriptor body: `name`, `size`,
/// `pieces`, `mirrors`, optional `file_hash`. The wire shape is JSON,
/// matching `Manifest`'s own `serde` derive.
pub fn parse_metalink(body: &[u8]) -> Result<Manifest, serde_json::Error> {
    serde_json::from_slice(body)
}

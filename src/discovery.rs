//! Discovery adapter: converts the output of three external parsers
//! (HTML, CSS, sitemap) into admission attempts. The parsers
//! themselves are out of scope; this module only depends on their
//! output contract.

use std::collections::HashSet;

use crate::admission::{Admission, AdmissionContext, Outcome};
use crate::args::Args;
use crate::queue::Job;
use crate::url::Url;

/// One anchor/link/etc. discovered by the HTML parser.
#[derive(Debug, Clone)]
pub struct HtmlLink {
    pub url: String,
    pub attr: String,
    pub tag: String,
}

/// The HTML parser's output contract.
#[derive(Debug, Clone, Default)]
pub struct HtmlDocument {
    pub base: Option<String>,
    pub encoding: Option<String>,
    pub follow_flag: bool,
    pub urls: Vec<HtmlLink>,
    pub bom: Option<Bom>,
    pub meta_charset: Option<String>,
    pub server_hint_charset: Option<String>,
    pub ascii_sniffable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bom {
    Utf16Be,
    Utf16Le,
    Utf8,
}

/// Resolve the document's effective encoding by precedence: explicit
/// config > BOM > parsed meta > server hint > default CP1252, with the
/// UTF-16-but-ASCII-sniffable override.
pub fn resolve_html_encoding(doc: &HtmlDocument, config_encoding: Option<&str>) -> String {
    if let Some(e) = config_encoding {
        return e.to_string();
    }
    if let Some(bom) = doc.bom {
        let forced = match bom {
            Bom::Utf16Be | Bom::Utf16Le if doc.ascii_sniffable => "UTF-8".to_string(),
            Bom::Utf16Be => "UTF-16BE".to_string(),
            Bom::Utf16Le => "UTF-16LE".to_string(),
            Bom::Utf8 => "UTF-8".to_string(),
        };
        return forced;
    }
    if let Some(m) = &doc.meta_charset {
        return m.clone();
    }
    if let Some(h) = &doc.server_hint_charset {
        return h.clone();
    }
    "CP1252".to_string()
}

/// A CSS `url(...)` occurrence, as streamed by the CSS parser.
#[derive(Debug, Clone)]
pub struct CssUrlEvent {
    pub uri: String,
    pub pos: usize,
}

/// Accumulates a CSS parse: first `@charset` callback wins.
#[derive(Default)]
pub struct CssCharsetTracker {
    charset: Option<String>,
}

impl CssCharsetTracker {
    pub fn on_charset(&mut self, value: &str) {
        if self.charset.is_none() {
            self.charset = Some(value.to_string());
        }
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }
}

/// The sitemap parser's output contract: sitemap-index URLs vs.
/// content URLs.
#[derive(Debug, Clone, Default)]
pub struct SitemapDocument {
    pub index_urls: Vec<String>,
    pub content_urls: Vec<String>,
}

/// Per-document admission loop, with a local dedup set so the same
/// token inside one document isn't submitted twice.
pub struct Discoverer<'a> {
    admission: &'a Admission,
    seen_in_document: HashSet<String>,
}

impl<'a> Discoverer<'a> {
    pub fn new(admission: &'a Admission) -> Self {
        Discoverer { admission, seen_in_document: HashSet::new() }
    }

    fn admit_once(&mut self, raw: &str, base: &Url, args: &Args, parent: &Job, is_sitemap_index: bool) -> Option<Outcome> {
        if !self.seen_in_document.insert(raw.to_string()) {
            return None;
        }
        let ctx = AdmissionContext {
            parent: Some(parent),
            is_redirect: false,
            is_seed: false,
            parents_scope: std::slice::from_ref(base),
            is_sitemap_index,
        };
        Some(self.admission.admit(raw, Some(base), args, ctx))
    }

    pub fn discover_html(&mut self, doc: &HtmlDocument, base: &Url, args: &Args, parent: &Job) {
        if !doc.follow_flag {
            return;
        }
        let effective_base = match &doc.base {
            Some(b) => Url::parse(b).unwrap_or_else(|_| base.clone()),
            None => base.clone(),
        };
        for link in &doc.urls {
            self.admit_once(&link.url, &effective_base, args, parent, false);
        }
    }

    pub fn discover_css(&mut self, events: &[CssUrlEvent], base: &Url, args: &Args, parent: &Job) {
        for event in events {
            self.admit_once(&event.uri, base, args, parent, false);
        }
    }

    /// Sitemap location-scoping: a child URL is only admitted if its
    /// canonical string starts with the sitemap's own directory prefix.
    /// Index URLs are admitted with the `sitemap` flag and content URLs
    /// as plain leaves.
    pub fn discover_sitemap(&mut self, doc: &SitemapDocument, sitemap_url: &Url, args: &Args, parent: &Job) {
        let scope = format!("{}://{}:{}{}", sitemap_url.scheme(), sitemap_url.host(), sitemap_url.port(), sitemap_url.dir_prefix());
        for raw in &doc.index_urls {
            if let Some(Outcome::Accept) = self.admit_once(raw, sitemap_url, args, parent, true) {
                self.admission.queue.worker_cond.notify_one();
            }
        }
        for raw in &doc.content_urls {
            let candidate = match Url::resolve(sitemap_url, raw) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if !candidate.canonical().starts_with(&scope) {
                continue;
            }
            self.admit_once(raw, sitemap_url, args, parent, false);
        }
    }
}

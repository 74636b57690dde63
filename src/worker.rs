//! Worker state machine: dequeue a job (or a metalink part), run the
//! HTTP transaction, persist the body, feed discovered URLs back
//! through admission.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::admission::{AdmissionContext, Outcome};
use crate::discovery::Discoverer;
use crate::error::FetchError;
use crate::http::{self, Classification, RequestPlan};
use crate::metalink::{self, Manifest, Mirror, MirrorSelector, Piece};
use crate::parsers;
use crate::persist::{self, WritePolicy, WriteTarget};
use crate::queue::{Job, PartOutcome, TakeResult, TakenPart};
use crate::robots::Robots;
use crate::run::Run;
use crate::url::Url;

pub struct Worker {
    pub id: usize,
    pub run: Arc<Run>,
}

impl Worker {
    pub fn new(id: usize, run: Arc<Run>) -> Self {
        Worker { id, run }
    }

    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn run_loop(&self) {
        loop {
            if self.run.is_terminated() {
                return;
            }
            match self.run.queue.take() {
                Some(TakeResult::Job(job)) => {
                    self.handle_job(job).await;
                }
                Some(TakeResult::Part(part)) => {
                    self.handle_part(part).await;
                }
                None => {
                    if self.run.queue.empty() {
                        return;
                    }
                    // Wait for a signal, but re-check periodically in
                    // case every remaining job is metalink parts that
                    // are all currently `inuse`.
                    tokio::select! {
                        _ = self.run.queue.worker_cond.notified() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
                    }
                }
            }
        }
    }

    async fn handle_job(&self, job: Job) {
        if job.robots_probe {
            self.handle_robots_job(job).await;
            return;
        }
        if self.run.quota.exceeded() {
            self.run.queue.remove(job.id);
            return;
        }
        if self.run.args.chunk_size > 0 && self.admit_chunked(&job).await {
            self.run.queue.remove(job.id);
            return;
        }
        match self.fetch_with_retries(&job).await {
            Ok(()) => self.run.queue.remove(job.id),
            Err(e) => {
                self.run.report_error(&e);
                self.run.queue.remove(job.id);
            }
        }
    }

    async fn handle_robots_job(&self, job: Job) {
        let url = job.url.clone();
        let plan = RequestPlan::default();
        let robots = match http::fetch(&self.run.client, &url, &plan).await {
            Ok(resp) if resp.meta.code.is_success() => {
                let body = String::from_utf8_lossy(&resp.body).to_string();
                crate::admission::parse_robots(&body, &self.run.net.user_agent)
            }
            // 404 on robots.txt is "no rules", not an error.
            _ => Robots::NotApplicable,
        };
        self.run
            .admission
            .flush_deferred(url.host(), url.port(), robots, url.scheme());
        self.run.queue.remove(job.id);
    }

    async fn handle_part(&self, part: TakenPart) {
        let Some(state) = self.run.manifest_state(part.job_id) else {
            warn!(job = part.job_id, "no manifest state for metalink part, dropping");
            self.run.queue.release_part(part.job_id, part.part_id, PartOutcome::Failed);
            return;
        };
        let Some(mirror) = state.selector.next_for(self.id) else {
            self.run.queue.release_part(part.job_id, part.part_id, PartOutcome::Failed);
            return;
        };
        let mirror = mirror.clone();

        let mut plan = RequestPlan::default();
        plan.range_from = Some(part.position);

        let outcome = match http::fetch(&self.run.client, &mirror, &plan).await {
            Ok(resp) if resp.meta.code.is_success() || resp.meta.code.as_u16() == 206 => {
                if !piece_verifies(&state.pieces, part.part_id, &resp.body) {
                    warn!(job = part.job_id, part = part.part_id, "piece failed checksum, retrying");
                    PartOutcome::Failed
                } else {
                    match metalink::write_part_at(&state.local_path, part.position, &resp.body, state.total_size) {
                        Ok(()) => PartOutcome::Done,
                        Err(e) => {
                            warn!(error = %e, "failed writing metalink part");
                            PartOutcome::Failed
                        }
                    }
                }
            }
            Ok(resp) => {
                warn!(mirror = %mirror, status = resp.meta.code.as_u16(), "mirror rejected part request");
                PartOutcome::Failed
            }
            Err(e) => {
                warn!(mirror = %mirror, error = %e, "mirror fetch failed for part");
                PartOutcome::Failed
            }
        };

        match self.run.queue.release_part(part.job_id, part.part_id, outcome) {
            crate::queue::PartRelease::ChecksumMismatch => {
                warn!(job = part.job_id, "assembled file failed checksum, refetching every part");
            }
            crate::queue::PartRelease::Completed => {
                self.run.manifests.lock().expect("manifest registry poisoned").remove(&part.job_id);
            }
            crate::queue::PartRelease::Pending => {}
        }
    }

    #[instrument(skip(self, job), fields(worker = self.id, url = %job.url))]
    async fn fetch_with_retries(&self, job: &Job) -> Result<(), FetchError> {
        let (scheme, host, port) = job.url.origin();
        let (host_entry, _created) = self.run.hosts.add(&scheme, &host, port);
        if host_entry.is_blocked() {
            return Ok(());
        }

        let mut attempt = 0u32;
        let mut had_challenge = false;
        let mut basic_auth: Option<(String, String)> = None;
        let local_path = persist::derive_path(&job.url, &self.run.args);

        loop {
            attempt += 1;
            let wait = host_entry.wait_ms();
            if wait > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
            }
            let mut plan = RequestPlan::default();
            plan.referer = job.referer.as_ref().map(|u| u.to_string());
            plan.basic_auth = basic_auth.clone();
            let requested_range = self.run.args.continue_download && local_path.exists();
            if requested_range {
                if let Ok(meta) = std::fs::metadata(&local_path) {
                    plan.range_from = Some(meta.len());
                }
            }
            if self.run.args.timestamping {
                if let Ok(meta) = std::fs::metadata(&local_path) {
                    plan.if_modified_since = meta.modified().ok().map(|t| t.into());
                }
            }

            let result = http::fetch(&self.run.client, &job.url, &plan).await;
            let resp = match result {
                Ok(r) => r,
                Err(e) if e.is_transient() => {
                    let failures = host_entry.increase_failure();
                    if attempt >= self.run.args.tries {
                        host_entry.final_failure();
                        self.run.queue.drop_host(&host, port);
                        warn!(url = %job.url, failures, "final failure after retries");
                        return Err(e);
                    }
                    let delay = http::backoff_delay(self.run.args.waitretry_duration(), attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = http::https_enforce_outcome(self.run.args.https_enforce, job.url.is_https()) {
                host_entry.final_failure();
                self.run.queue.drop_host(&host, port);
                return Err(e);
            }

            let classification = http::classify(&resp.meta, requested_range, had_challenge);
            match classification {
                Classification::Success => {
                    host_entry.reset_failure();
                    self.persist_and_discover(job, &resp, &local_path, false).await?;
                    return Ok(());
                }
                Classification::PartialContent => {
                    host_entry.reset_failure();
                    if let Some(cr) = &resp.meta.content_range {
                        if let Ok(meta) = std::fs::metadata(&local_path) {
                            if meta.len() != cr.start {
                                return Err(FetchError::Protocol(
                                    "ranged response start does not match existing file length".into(),
                                ));
                            }
                        }
                    }
                    self.persist_and_discover(job, &resp, &local_path, true).await?;
                    return Ok(());
                }
                Classification::NotModified => {
                    info!(url = %job.url, "not modified, local file up to date");
                    if local_path.exists() {
                        self.run_discovery_on_disk(job, &local_path).await;
                    }
                    return Ok(());
                }
                Classification::Redirect(location) => {
                    self.admit_redirect(job, &location);
                    return Ok(());
                }
                Classification::MetalinkDescriptor(descriptor_url) => {
                    self.admit_metalink(job, &descriptor_url).await?;
                    return Ok(());
                }
                Classification::AuthRetry => {
                    had_challenge = true;
                    if !self.run.args.netrc {
                        return Err(FetchError::AuthRequired);
                    }
                    match crate::netrc::lookup(&host) {
                        Some(creds) => {
                            basic_auth = Some((creds.login, creds.password));
                            continue;
                        }
                        None => return Err(FetchError::AuthRequired),
                    }
                }
                Classification::Remote4xx5xx => {
                    let status = resp.meta.code.as_u16();
                    if http::is_retryable_status(resp.meta.code) && attempt < self.run.args.tries {
                        let failures = host_entry.increase_failure();
                        let delay = http::backoff_delay(self.run.args.waitretry_duration(), attempt);
                        let delay = match resp.meta.retry_after {
                            Some(ra) => {
                                host_entry.set_retry_after(Instant::now() + ra);
                                delay.max(ra)
                            }
                            None => delay,
                        };
                        warn!(url = %job.url, status, failures, "retryable status, backing off");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    host_entry.final_failure();
                    self.run.queue.drop_host(&host, port);
                    return Err(FetchError::Remote4xx { status });
                }
            }
        }
    }

    async fn persist_and_discover(
        &self,
        job: &Job,
        resp: &crate::http::Response,
        path: &Path,
        is_range_append: bool,
    ) -> Result<(), FetchError> {
        let reserve = resp.body.len() as u64;
        self.run.quota.reserve(reserve)?;

        let path = persist::adjust_extension(path, resp.meta.content_type.as_deref());
        let policy = WritePolicy {
            spider: false,
            delete_after: false,
            clobber: self.run.args.clobber,
            append: is_range_append,
        };
        match persist::choose_write_target(&path, &policy)? {
            WriteTarget::Discard => {}
            WriteTarget::Stdout => {
                use std::io::Write;
                let _ = std::io::stdout().write_all(&resp.body);
            }
            WriteTarget::File(final_path) => {
                persist::write_body(&final_path, &resp.body, is_range_append)?;
                if self.run.args.timestamping {
                    if let Some(lm) = resp.meta.last_modified {
                        let _ = persist::set_mtime(&final_path, lm);
                    }
                }
                self.discover_from_response(job, resp, &final_path).await;
            }
        }
        Ok(())
    }

    async fn run_discovery_on_disk(&self, job: &Job, path: &Path) {
        if let Ok(body) = std::fs::read_to_string(path) {
            self.discover_html_body(job, &body, &job.url);
        }
    }

    async fn discover_from_response(&self, job: &Job, resp: &crate::http::Response, path: &Path) {
        if !self.run.args.recursive {
            return;
        }
        let is_html = resp
            .meta
            .content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or_else(|| path.extension().map(|e| e == "html").unwrap_or(false));
        let is_css = resp
            .meta
            .content_type
            .as_deref()
            .map(|ct| ct.contains("text/css"))
            .unwrap_or_else(|| path.extension().map(|e| e == "css").unwrap_or(false));
        let is_sitemap = job.sitemap
            || job
                .url
                .path()
                .rsplit('/')
                .next()
                .map(|name| name.starts_with("sitemap"))
                .unwrap_or(false);

        let body = String::from_utf8_lossy(&resp.body).to_string();
        if is_sitemap {
            let doc = parsers::parse_sitemap(&body);
            let mut discoverer = Discoverer::new(&self.run.admission);
            discoverer.discover_sitemap(&doc, &job.url, &self.run.args, job);
        } else if is_html {
            self.discover_html_body(job, &body, &job.url);
        } else if is_css {
            let (events, _charset) = parsers::parse_css(&body);
            let mut discoverer = Discoverer::new(&self.run.admission);
            discoverer.discover_css(&events, &job.url, &self.run.args, job);
        }
    }

    fn discover_html_body(&self, job: &Job, body: &str, base: &Url) {
        let doc = parsers::parse_html(body);
        let mut discoverer = Discoverer::new(&self.run.admission);
        discoverer.discover_html(&doc, base, &self.run.args, job);
    }

    fn admit_redirect(&self, job: &Job, location: &str) {
        let ctx = AdmissionContext {
            parent: Some(job),
            is_redirect: true,
            is_seed: false,
            parents_scope: std::slice::from_ref(&job.url),
            is_sitemap_index: false,
        };
        let outcome = self.run.admission.admit(location, Some(&job.url), &self.run.args, ctx);
        if matches!(outcome, Outcome::Reject) {
            info!(url = %job.url, location, "redirect rejected (scope or redirect-cap)");
        }
    }

    /// Single-origin chunked segmentation (`--chunk-size`). A HEAD
    /// probe decides whether the target is large enough and
    /// range-capable; if so it is split into parts fetched against its
    /// own URL as the only mirror, reusing the metalink machinery
    /// wholesale. Returns `false` (leaving the job to the ordinary
    /// single-request path) whenever the probe fails or the target
    /// doesn't qualify.
    async fn admit_chunked(&self, job: &Job) -> bool {
        if job.parts.is_some() || job.metalink.is_some() {
            return false;
        }
        let chunk_size = self.run.args.chunk_size;
        let resp = match self.run.client.head(job.url.as_str()).send().await {
            Ok(r) => r,
            Err(_) => return false,
        };
        let accepts_ranges = resp
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let size = resp.content_length();
        let Some(size) = size else { return false };
        if !accepts_ranges || size <= chunk_size {
            return false;
        }

        let mut pieces = Vec::new();
        let mut pos = 0u64;
        while pos < size {
            let length = chunk_size.min(size - pos);
            pieces.push(Piece { position: pos, length, hash: None });
            pos += length;
        }
        let name = job.url.path().rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("download");
        let manifest = Manifest {
            name: name.to_string(),
            size,
            pieces,
            mirrors: vec![Mirror { url: job.url.as_str().to_string(), priority: 0 }],
            file_hash: None,
        };

        let mut child = Job::new_child(job.url.clone(), job, false);
        let local_path = persist::derive_path(&job.url, &self.run.args);
        let child_id = child.id;
        let total_size = manifest.size;
        let pieces = manifest.pieces.clone();
        let selector = Worker::install_manifest(&mut child, manifest);
        self.run.register_manifest(child_id, crate::run::ManifestState { local_path, selector, total_size, pieces });
        self.run.queue.put(child);
        true
    }

    /// Fetch and parse a metalink descriptor reached via a `describedby`
    /// `Link` relation, install its parts on a fresh Job, and register
    /// the mirror selector so `handle_part` can drain pieces.
    async fn admit_metalink(&self, job: &Job, descriptor_url: &str) -> Result<(), FetchError> {
        let descriptor = match Url::parse(descriptor_url).or_else(|_| Url::resolve(&job.url, descriptor_url)) {
            Ok(u) => u,
            Err(_) => return Ok(()),
        };

        let plan = RequestPlan::default();
        let resp = match http::fetch(&self.run.client, &descriptor, &plan).await {
            Ok(resp) if resp.meta.code.is_success() => resp,
            Ok(resp) => {
                warn!(url = %descriptor, status = resp.meta.code.as_u16(), "metalink descriptor fetch failed");
                return Ok(());
            }
            Err(e) => {
                warn!(url = %descriptor, error = %e, "metalink descriptor fetch failed");
                return Ok(());
            }
        };

        let manifest = match parsers::parse_metalink(&resp.body) {
            Ok(m) => m,
            Err(e) => {
                warn!(url = %descriptor, error = %e, "malformed metalink descriptor");
                return Ok(());
            }
        };

        let mut manifest_job = Job::new_child(descriptor.clone(), job, false);
        let target_name = persist::sanitize_component(&manifest.name, self.run.args.restrict_file_names);
        let local_path = persist::derive_path(&descriptor, &self.run.args).with_file_name(target_name);
        let manifest_job_id = manifest_job.id;
        manifest_job.local_filename = Some(local_path.to_string_lossy().into_owned());
        let total_size = manifest.size;
        let pieces = manifest.pieces.clone();
        let selector = Worker::install_manifest(&mut manifest_job, manifest);

        self.run.register_manifest(manifest_job_id, crate::run::ManifestState { local_path, selector, total_size, pieces });
        self.run.queue.put(manifest_job);
        Ok(())
    }

    /// Install a fetched manifest's parts into its owning job.
    pub fn install_manifest(job: &mut Job, manifest: Manifest) -> MirrorSelector {
        let mirrors: Vec<Url> = manifest
            .sorted_mirrors()
            .into_iter()
            .filter_map(|m| Url::parse(&m.url).ok())
            .collect();
        job.parts = Some(manifest.build_parts());
        job.metalink = Some(manifest);
        MirrorSelector::new(mirrors)
    }
}

/// Whether a landed piece's bytes match the manifest's hash for it, when
/// one was declared. A piece with no declared hash always verifies.
fn piece_verifies(pieces: &[Piece], part_id: usize, data: &[u8]) -> bool {
    match pieces.get(part_id).and_then(|p| p.hash.as_deref()) {
        Some(expected) => metalink::piece_hash_matches(data, expected),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metalink::{Manifest, Mirror, Piece};

    fn sample_manifest() -> Manifest {
        Manifest {
            name: "file.bin".into(),
            size: 20,
            pieces: vec![
                Piece { position: 0, length: 10, hash: None },
                Piece { position: 10, length: 10, hash: None },
            ],
            mirrors: vec![
                Mirror { url: "http://m1/file.bin".into(), priority: 0 },
                Mirror { url: "http://m2/file.bin".into(), priority: 1 },
            ],
            file_hash: None,
        }
    }

    #[test]
    fn install_manifest_populates_parts_and_selector() {
        let mut job = Job::new_seed(Url::parse("http://h/file.metalink").unwrap());
        let selector = Worker::install_manifest(&mut job, sample_manifest());
        assert_eq!(job.parts.as_ref().unwrap().len(), 2);
        assert!(job.metalink.is_some());
        assert_eq!(selector.len(), 2);
        assert!(selector.next_for(0).is_some());
    }

    #[test]
    fn piece_verifies_checks_declared_hash_and_passes_unhashed_pieces() {
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde";
        let pieces = vec![
            Piece { position: 0, length: 11, hash: Some(expected.to_string()) },
            Piece { position: 11, length: 5, hash: None },
        ];
        assert!(piece_verifies(&pieces, 0, b"hello world"));
        assert!(!piece_verifies(&pieces, 0, b"corrupted!!"));
        assert!(piece_verifies(&pieces, 1, b"anything"));
    }
}

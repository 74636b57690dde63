//! Job queue and the `Job`/`Part` data model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::metalink::Manifest;
use crate::url::Url;

pub type JobId = u64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// One contiguous byte range of a metalink target file.
#[derive(Debug, Clone)]
pub struct Part {
    pub id: usize,
    pub position: u64,
    pub length: u64,
    pub done: bool,
    pub inuse: bool,
}

/// Bound to exactly one URL, mutated only by its current owning worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: Url,
    pub level: u32,
    pub redirection_level: u32,
    pub referer: Option<Url>,
    pub local_filename: Option<String>,
    pub sitemap: bool,
    pub robots_probe: bool,
    pub deferred_urls: Vec<DeferredUrl>,
    pub metalink: Option<Manifest>,
    pub parts: Option<Vec<Part>>,
}

/// A candidate URL parked on a host's robots fetch.
#[derive(Debug, Clone)]
pub struct DeferredUrl {
    pub url: Url,
    pub level: u32,
    pub redirection_level: u32,
    pub referer: Option<Url>,
}

impl Job {
    pub fn new_seed(url: Url) -> Self {
        Job {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            url,
            level: 0,
            redirection_level: 0,
            referer: None,
            local_filename: None,
            sitemap: false,
            robots_probe: false,
            deferred_urls: Vec::new(),
            metalink: None,
            parts: None,
        }
    }

    /// `bump_redirect` distinguishes a redirect hop from a discovered
    /// link: redirection never increments `level`, only
    /// `redirection_level`.
    pub fn new_child(url: Url, parent: &Job, bump_redirect: bool) -> Self {
        Job {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            url,
            level: if bump_redirect { parent.level } else { parent.level + 1 },
            redirection_level: if bump_redirect { parent.redirection_level + 1 } else { 0 },
            referer: Some(parent.url.clone()),
            local_filename: None,
            sitemap: false,
            robots_probe: false,
            deferred_urls: Vec::new(),
            metalink: None,
            parts: None,
        }
    }

    pub fn new_robots_probe(url: Url) -> Self {
        let mut job = Job::new_seed(url);
        job.robots_probe = true;
        job
    }

    /// `true` iff every part is done.
    pub fn all_parts_done(&self) -> bool {
        self.parts.as_ref().map(|p| p.iter().all(|part| part.done)).unwrap_or(true)
    }
}

/// A Part pulled out for a worker to fetch, identified by its parent job.
#[derive(Debug, Clone)]
pub struct TakenPart {
    pub job_id: JobId,
    pub part_id: usize,
    pub position: u64,
    pub length: u64,
}

struct Inner {
    jobs: VecDeque<Job>,
    /// Monotonic count of seed/link producers still able to enqueue.
    /// `empty()` is true only when there are no jobs and no live
    /// input producer.
    input_producers: u32,
    /// Units handed out by `take()` and not yet resolved by `remove()`
    /// or `release_part()`. Without this, a worker that has just taken
    /// the last job (emptying `jobs`) but hasn't finished handling it
    /// yet would make `empty()` look true to the supervisor's
    /// termination poll, which races shutdown against the in-flight
    /// fetch.
    inflight: u32,
}

/// Globally ordered admission ring of `Job`s.
pub struct JobQueue {
    inner: Mutex<Inner>,
    pub worker_cond: Notify,
    pub main_cond: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        JobQueue {
            inner: Mutex::new(Inner { jobs: VecDeque::new(), input_producers: 0, inflight: 0 }),
            worker_cond: Notify::new(),
            main_cond: Notify::new(),
        }
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input_producer(&self) {
        self.inner.lock().expect("queue mutex poisoned").input_producers += 1;
    }

    pub fn deregister_input_producer(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.input_producers = inner.input_producers.saturating_sub(1);
        drop(inner);
        self.main_cond.notify_waiters();
    }

    pub fn put(&self, job: Job) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.jobs.push_back(job);
        drop(inner);
        self.worker_cond.notify_one();
    }

    /// Take the next runnable unit of work: a whole job, or — when the
    /// front job has a metalink manifest with undone parts — one part
    /// with `inuse = true`.
    pub fn take(&self) -> Option<TakeResult> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        for job in inner.jobs.iter_mut() {
            if let Some(parts) = job.parts.as_mut() {
                if let Some(part) = parts.iter_mut().find(|p| !p.done && !p.inuse) {
                    part.inuse = true;
                    let job_id = job.id;
                    let part_id = part.id;
                    let position = part.position;
                    let length = part.length;
                    inner.inflight += 1;
                    return Some(TakeResult::Part(TakenPart { job_id, part_id, position, length }));
                }
                // All parts either done or in flight; nothing to hand out
                // for this job right now, but it's not complete yet.
                continue;
            }
            let job = inner.jobs.pop_front().expect("front job exists");
            inner.inflight += 1;
            return Some(TakeResult::Job(job));
        }
        None
    }

    /// Release a part back after a worker's attempt. When this was the
    /// last undone part, the full-file checksum is verified here, under
    /// the same lock that observes "every part done" — only a hash
    /// match removes the job; a mismatch leaves it queued with every
    /// part marked undone so it is refetched from scratch rather than
    /// silently declared complete.
    pub fn release_part(&self, job_id: JobId, part_id: usize, outcome: PartOutcome) -> PartRelease {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.inflight = inner.inflight.saturating_sub(1);
        let mut completed_job = None;
        if let Some(job) = inner.jobs.iter_mut().find(|j| j.id == job_id) {
            if let Some(parts) = job.parts.as_mut() {
                if let Some(part) = parts.iter_mut().find(|p| p.id == part_id) {
                    part.inuse = false;
                    if matches!(outcome, PartOutcome::Done) {
                        part.done = true;
                    }
                }
            }
            if job.all_parts_done() {
                completed_job = Some(job.id);
            }
        }
        let Some(id) = completed_job else {
            drop(inner);
            self.worker_cond.notify_one();
            return PartRelease::Pending;
        };

        let hash_ok = inner.jobs.iter().find(|j| j.id == id).and_then(|job| {
            let manifest = job.metalink.as_ref()?;
            let file_hash = manifest.file_hash.as_ref()?;
            let path = job.local_filename.as_ref()?;
            crate::metalink::file_hash_matches(std::path::Path::new(path), file_hash).ok()
        });

        match hash_ok {
            Some(false) => {
                // Mismatch: force every part to be refetched rather than
                // declaring completion.
                if let Some(job) = inner.jobs.iter_mut().find(|j| j.id == id) {
                    if let Some(parts) = job.parts.as_mut() {
                        for p in parts.iter_mut() {
                            p.done = false;
                            p.inuse = false;
                        }
                    }
                }
                drop(inner);
                self.worker_cond.notify_one();
                PartRelease::ChecksumMismatch
            }
            _ => {
                inner.jobs.retain(|j| j.id != id);
                drop(inner);
                self.main_cond.notify_waiters();
                PartRelease::Completed
            }
        }
    }

    /// Detach a whole job.
    pub fn remove(&self, job_id: JobId) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.inflight = inner.inflight.saturating_sub(1);
        inner.jobs.retain(|j| j.id != job_id);
        drop(inner);
        self.main_cond.notify_waiters();
    }

    /// Drop every queued job for a blocked host.
    pub fn drop_host(&self, host: &str, port: u16) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.jobs.retain(|j| !(j.url.host() == host && j.url.port() == port));
        drop(inner);
        self.main_cond.notify_waiters();
    }

    pub fn empty(&self) -> bool {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.jobs.is_empty() && inner.input_producers == 0 && inner.inflight == 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").jobs.len()
    }
}

pub enum TakeResult {
    Job(Job),
    Part(TakenPart),
}

pub enum PartOutcome {
    Done,
    Failed,
}

pub enum PartRelease {
    Pending,
    Completed,
    ChecksumMismatch,
}

//! Host registry: per-host robots policy, failure counter, block flag,
//! retry-after timestamp, and the deferred-URL parking lot for hosts
//! whose robots.txt hasn't loaded yet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::queue::{DeferredUrl, JobId};
use crate::robots::Robots;

pub struct HostEntry {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub failures: AtomicU32,
    pub blocked: AtomicBool,
    retry_ts: Mutex<Option<Instant>>,
    robots: Mutex<Option<Robots>>,
    pub robot_job: Mutex<Option<JobId>>,
    pub deferred_urls: Mutex<Vec<DeferredUrl>>,
}

impl HostEntry {
    fn new(scheme: &str, host: &str, port: u16) -> Self {
        HostEntry {
            host: host.to_string(),
            port,
            scheme: scheme.to_string(),
            failures: AtomicU32::new(0),
            blocked: AtomicBool::new(false),
            retry_ts: Mutex::new(None),
            robots: Mutex::new(None),
            robot_job: Mutex::new(None),
            deferred_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn increase_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_failure(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn final_failure(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn set_retry_after(&self, when: Instant) {
        *self.retry_ts.lock().expect("host mutex poisoned") = Some(when);
    }

    /// Milliseconds to wait before this host may be dispatched again, or
    /// `0` if it's runnable now.
    pub fn wait_ms(&self) -> u64 {
        let guard = self.retry_ts.lock().expect("host mutex poisoned");
        match *guard {
            Some(ts) => {
                let now = Instant::now();
                if ts > now {
                    (ts - now).as_millis() as u64
                } else {
                    0
                }
            }
            None => 0,
        }
    }

    pub fn set_robots(&self, robots: Robots) {
        *self.robots.lock().expect("host mutex poisoned") = Some(robots);
    }

    pub fn robots_loaded(&self) -> bool {
        self.robots.lock().expect("host mutex poisoned").is_some()
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        match &*self.robots.lock().expect("host mutex poisoned") {
            Some(r) => r.is_allowed(path),
            None => true,
        }
    }

    pub fn push_deferred(&self, url: DeferredUrl) {
        self.deferred_urls.lock().expect("host mutex poisoned").push(url);
    }

    pub fn drain_deferred(&self) -> Vec<DeferredUrl> {
        std::mem::take(&mut *self.deferred_urls.lock().expect("host mutex poisoned"))
    }
}

#[derive(Default)]
pub struct HostRegistry {
    hosts: Mutex<HashMap<(String, String, u16), std::sync::Arc<HostEntry>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert by `(scheme, host, port)`; returns the entry and
    /// whether it was newly created.
    pub fn add(&self, scheme: &str, host: &str, port: u16) -> (std::sync::Arc<HostEntry>, bool) {
        let mut hosts = self.hosts.lock().expect("host registry mutex poisoned");
        let key = (scheme.to_string(), host.to_string(), port);
        if let Some(existing) = hosts.get(&key) {
            (existing.clone(), false)
        } else {
            let entry = std::sync::Arc::new(HostEntry::new(scheme, host, port));
            hosts.insert(key, entry.clone());
            (entry, true)
        }
    }

    pub fn get(&self, scheme: &str, host: &str, port: u16) -> Option<std::sync::Arc<HostEntry>> {
        self.hosts
            .lock()
            .expect("host registry mutex poisoned")
            .get(&(scheme.to_string(), host.to_string(), port))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_per_origin() {
        let reg = HostRegistry::new();
        let (a, created_a) = reg.add("http", "h", 80);
        let (b, created_b) = reg.add("http", "h", 80);
        assert!(created_a);
        assert!(!created_b);
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn final_failure_blocks_host() {
        let entry = HostEntry::new("http", "h", 80);
        assert!(!entry.is_blocked());
        entry.final_failure();
        assert!(entry.is_blocked());
    }

    #[test]
    fn reset_failure_clears_counter() {
        let entry = HostEntry::new("http", "h", 80);
        entry.increase_failure();
        entry.increase_failure();
        entry.reset_failure();
        assert_eq!(entry.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_ms_reflects_retry_after_then_clears_on_elapse() {
        let entry = HostEntry::new("http", "h", 80);
        assert_eq!(entry.wait_ms(), 0);
        entry.set_retry_after(Instant::now() + std::time::Duration::from_millis(50));
        assert!(entry.wait_ms() > 0);
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(entry.wait_ms(), 0);
    }
}

//! DNS cache.
//!
//! A concurrent map from `(host, port)` to resolved addresses, with at
//! most one in-flight resolution per key. Retries a transient failure
//! up to three times with a short delay between attempts.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::lookup_host;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::FetchError;

const RESOLVE_RETRIES: u32 = 3;
const RESOLVE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Any,
    V4,
    V6,
}

#[derive(Clone, Debug)]
pub struct AddressList(pub Vec<IpAddr>);

type Key = (String, u16);

pub struct DnsCache {
    entries: Mutex<HashMap<Key, AddressList>>,
    /// Coarse lock serializing all cache misses.
    resolve_lock: AsyncMutex<()>,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            resolve_lock: AsyncMutex::new(()),
        }
    }
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str, port: u16) -> Option<AddressList> {
        self.entries
            .lock()
            .expect("dns cache mutex poisoned")
            .get(&(host.to_string(), port))
            .cloned()
    }

    pub fn put(&self, host: &str, port: u16, addrs: AddressList) -> AddressList {
        let mut entries = self.entries.lock().expect("dns cache mutex poisoned");
        // First inserter wins; a losing concurrent resolver's result is
        // simply dropped.
        entries
            .entry((host.to_string(), port))
            .or_insert(addrs)
            .clone()
    }

    /// Resolve `host:port`, consulting the cache first, retrying
    /// transient failures, and reordering by `preferred_family` when
    /// `family == Any`.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: Family,
        preferred_family: Family,
    ) -> Result<AddressList, FetchError> {
        if let Some(cached) = self.get(host, port) {
            return Ok(cached);
        }

        let _guard = self.resolve_lock.lock().await;
        // Re-check: another task may have populated the cache while we
        // waited on the coarse lock.
        if let Some(cached) = self.get(host, port) {
            return Ok(cached);
        }

        let mut last_err = None;
        for attempt in 0..RESOLVE_RETRIES {
            match lookup_host((host, port)).await {
                Ok(iter) => {
                    let addrs: Vec<IpAddr> = iter.map(|s: SocketAddr| s.ip()).collect();
                    let filtered = filter_family(addrs, family);
                    let sorted = sort_by_preference(filtered, family, preferred_family);
                    debug!(host, port, count = sorted.len(), "dns resolved");
                    return Ok(self.put(host, port, AddressList(sorted)));
                }
                Err(e) => {
                    warn!(host, port, attempt, error = %e, "dns resolve attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < RESOLVE_RETRIES {
                        tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(FetchError::Resolve {
            kind: last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown".into()),
        })
    }
}

/// Plugs `DnsCache` into `reqwest` as its resolver so every connection
/// the client opens — not only ones this crate resolves by hand —
/// shares the same cache, in-flight lock and retry policy.
pub struct CachingResolver {
    cache: Arc<DnsCache>,
    timeout: Option<Duration>,
}

impl CachingResolver {
    pub fn new(cache: Arc<DnsCache>, timeout: Option<Duration>) -> Self {
        Self { cache, timeout }
    }
}

impl reqwest::dns::Resolve for CachingResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let cache = self.cache.clone();
        let timeout = self.timeout;
        let host = name.as_str().to_string();
        Box::pin(async move {
            let resolution = cache.resolve(&host, 0, Family::Any, Family::Any);
            let addrs = match timeout {
                Some(d) => match tokio::time::timeout(d, resolution).await {
                    Ok(inner) => inner?,
                    Err(_) => return Err(FetchError::Resolve { kind: "timed out".into() }.into()),
                },
                None => resolution.await?,
            };
            let iter: reqwest::dns::Addrs = Box::new(addrs.0.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(iter)
        })
    }
}

fn filter_family(addrs: Vec<IpAddr>, family: Family) -> Vec<IpAddr> {
    match family {
        Family::Any => addrs,
        Family::V4 => addrs.into_iter().filter(|a| a.is_ipv4()).collect(),
        Family::V6 => addrs.into_iter().filter(|a| a.is_ipv6()).collect(),
    }
}

/// Reorder so addresses of `preferred_family` sort first, preserving
/// relative order inside each bucket.
fn sort_by_preference(addrs: Vec<IpAddr>, family: Family, preferred: Family) -> Vec<IpAddr> {
    if family != Family::Any || preferred == Family::Any {
        return addrs;
    }
    let mut preferred_bucket = Vec::new();
    let mut other_bucket = Vec::new();
    for addr in addrs {
        let is_preferred = match preferred {
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
            Family::Any => unreachable!(),
        };
        if is_preferred {
            preferred_bucket.push(addr);
        } else {
            other_bucket.push(addr);
        }
    }
    preferred_bucket.extend(other_bucket);
    preferred_bucket
}

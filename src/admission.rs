//! Admission policy: the ordered gatekeeping chain that decides
//! whether a candidate URL becomes a `Job`. An ordered list of
//! predicates, each returning `Accept | Reject(reason) | Defer(on_job)`,
//! short-circuiting on the first non-accept.

use std::sync::Arc;
use tracing::{debug, info};

use crate::args::Args;
use crate::blacklist::Blacklist;
use crate::host::HostRegistry;
use crate::queue::{DeferredUrl, Job, JobQueue};
use crate::robots::{self, Robots};
use crate::url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Reject,
    Deferred,
}

pub struct AdmissionContext<'a> {
    pub parent: Option<&'a Job>,
    pub is_redirect: bool,
    pub is_seed: bool,
    pub parents_scope: &'a [Url],
    /// Set when the candidate is itself a sitemap-index URL, so the
    /// resulting job's `sitemap` flag is carried forward to its own
    /// discovery pass rather than inferred only from the URL's
    /// filename.
    pub is_sitemap_index: bool,
}

pub struct Admission {
    pub blacklist: Arc<Blacklist>,
    pub hosts: Arc<HostRegistry>,
    pub queue: Arc<JobQueue>,
}

impl Admission {
    pub fn new(blacklist: Arc<Blacklist>, hosts: Arc<HostRegistry>, queue: Arc<JobQueue>) -> Self {
        Admission { blacklist, hosts, queue }
    }

    /// Run the full ordered chain for a single candidate URL. Returns
    /// the decision; on `Accept` the job has already been enqueued
    /// (and `worker_cond` signaled).
    pub fn admit(&self, raw: &str, base: Option<&Url>, args: &Args, ctx: AdmissionContext) -> Outcome {
        // 1. Resolve against the contextual base.
        let candidate = match base {
            Some(b) => Url::resolve(b, raw),
            None => Url::parse(raw),
        };
        let url = match candidate {
            Ok(u) => u,
            Err(_) => {
                debug!(raw, "admission: invalid url, dropped silently");
                return Outcome::Reject;
            }
        };

        // 2. https-only.
        if args.https_only && !url.is_https() {
            debug!(%url, "admission: rejected, https-only");
            return Outcome::Reject;
        }

        // 3. Redirection depth.
        if ctx.is_redirect {
            if let Some(parent) = ctx.parent {
                if parent.redirection_level + 1 > args.max_redirect {
                    info!(%url, "admission: rejected, max-redirect exceeded");
                    return Outcome::Reject;
                }
            }
        }

        // 3b. Recursion depth ceiling (redirects are exempt, see step 3).
        if args.recursive && args.level > 0 && !ctx.is_redirect && next_level(&ctx) > args.level {
            info!(%url, "admission: rejected, recursion depth exceeded");
            return Outcome::Reject;
        }

        // 4. Host scope (span-hosts / domains / exclude-domains).
        if args.recursive && !args.span_hosts {
            let domains = args.domains_list();
            let excluded = args.exclude_domains_list();
            let host = url.host().to_ascii_lowercase();
            let allowed_by_domains = domains.is_empty() || domains.iter().any(|d| d == &host);
            let seed_host_ok = ctx
                .is_seed
                .then_some(true)
                .or_else(|| ctx.parent.map(|p| p.url.host().eq_ignore_ascii_case(&host)))
                .unwrap_or(false);
            if excluded.iter().any(|d| d == &host) || !(allowed_by_domains || seed_host_ok) {
                debug!(%url, "admission: rejected, out of host scope");
                return Outcome::Reject;
            }
        }

        // 5. Parent-directory ascent.
        if args.recursive && args.no_parent {
            let allowed = ctx.parents_scope.iter().any(|p| {
                p.host() == url.host() && url.path().starts_with(p.dir_prefix())
            });
            if !allowed {
                info!(%url, "admission: rejected, parent ascending not allowed");
                return Outcome::Reject;
            }
        }

        // 6. robots.
        if args.robots {
            let (host_entry, created) = self.hosts.add(url.scheme(), url.host(), url.port());
            if created {
                let robots_job = Job::new_robots_probe(robots_url(&url));
                *host_entry.robot_job.lock().expect("host mutex poisoned") = Some(robots_job.id);
                self.queue.put(robots_job);
                host_entry.push_deferred(DeferredUrl {
                    url: url.clone(),
                    level: next_level(&ctx),
                    redirection_level: next_redirection_level(&ctx),
                    referer: ctx.parent.map(|p| p.url.clone()),
                });
                debug!(%url, "admission: deferred pending robots.txt");
                return Outcome::Deferred;
            }
            if !host_entry.robots_loaded() {
                host_entry.push_deferred(DeferredUrl {
                    url: url.clone(),
                    level: next_level(&ctx),
                    redirection_level: next_redirection_level(&ctx),
                    referer: ctx.parent.map(|p| p.url.clone()),
                });
                return Outcome::Deferred;
            }
            if !host_entry.is_allowed(url.path()) {
                info!(%url, "admission: rejected by robots.txt");
                return Outcome::Reject;
            }
        }

        // 7. Blacklist.
        if !self.blacklist.add(&url.canonical()) {
            debug!(%url, "admission: already admitted, dropped");
            return Outcome::Reject;
        }

        // 8-9. Enqueue and signal.
        let mut job = match ctx.parent {
            Some(parent) => Job::new_child(url.clone(), parent, ctx.is_redirect),
            None => Job::new_seed(url.clone()),
        };
        job.sitemap = ctx.is_sitemap_index;
        self.queue.put(job);
        Outcome::Accept
    }

    /// Re-run admission for URLs parked on a host's robots fetch, once
    /// that fetch has completed.
    pub fn flush_deferred(&self, host: &str, port: u16, robots: Robots, scheme: &str) {
        let Some(entry) = self.hosts.get(scheme, host, port) else { return };
        entry.set_robots(robots);
        let deferred = entry.drain_deferred();
        for d in deferred {
            if !entry.is_allowed(d.url.path()) {
                info!(url = %d.url, "admission: deferred url rejected by robots.txt");
                continue;
            }
            if !self.blacklist.add(&d.url.canonical()) {
                continue;
            }
            let mut job = Job::new_seed(d.url);
            job.level = d.level;
            job.redirection_level = d.redirection_level;
            job.referer = d.referer;
            self.queue.put(job);
        }
    }
}

fn next_level(ctx: &AdmissionContext) -> u32 {
    match ctx.parent {
        Some(p) if ctx.is_redirect => p.level,
        Some(p) => p.level + 1,
        None => 0,
    }
}

fn next_redirection_level(ctx: &AdmissionContext) -> u32 {
    if ctx.is_redirect {
        ctx.parent.map(|p| p.redirection_level + 1).unwrap_or(0)
    } else {
        0
    }
}

fn robots_url(u: &Url) -> Url {
    let base = format!("{}://{}:{}/robots.txt", u.scheme(), u.host(), u.port());
    Url::parse(&base).expect("robots.txt url always parses")
}

pub fn parse_robots(body: &str, user_agent: &str) -> Robots {
    robots::parse(body, user_agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args_with(extra: &[&str]) -> Args {
        let mut v = vec!["fetchd"];
        v.extend_from_slice(extra);
        v.push("http://h/");
        Args::parse_from(v)
    }

    fn fresh() -> (Admission, Args) {
        let bl = Arc::new(Blacklist::new());
        let hosts = Arc::new(HostRegistry::new());
        let queue = Arc::new(JobQueue::new());
        (Admission::new(bl, hosts, queue), args_with(&["--robots=false", "-r"]))
    }

    #[test]
    fn duplicate_url_with_fragment_admits_once() {
        let (adm, args) = fresh();
        let ctx1 = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        let ctx2 = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://h/a", None, &args, ctx1), Outcome::Accept);
        assert_eq!(adm.admit("http://h/a#frag", None, &args, ctx2), Outcome::Reject);
        assert_eq!(adm.queue.len(), 1);
    }

    #[test]
    fn https_only_rejects_http_candidate() {
        let (adm, mut args) = fresh();
        args.https_only = true;
        let ctx = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://h/a", None, &args, ctx), Outcome::Reject);
    }

    #[test]
    fn no_parent_rejects_ascent_outside_scope() {
        let (adm, mut args) = fresh();
        args.no_parent = true;
        let parent_url = Url::parse("http://h/p/").unwrap();
        let parent_job = Job::new_seed(parent_url.clone());
        let scope = vec![parent_url];
        let ctx_ok = AdmissionContext { parent: Some(&parent_job), is_redirect: false, is_seed: false, parents_scope: &scope, is_sitemap_index: false };
        assert_eq!(adm.admit("/p/q", Some(&parent_job.url), &args, ctx_ok), Outcome::Accept);

        let ctx_bad = AdmissionContext { parent: Some(&parent_job), is_redirect: false, is_seed: false, parents_scope: &scope, is_sitemap_index: false };
        assert_eq!(adm.admit("/other/z", Some(&parent_job.url), &args, ctx_bad), Outcome::Reject);
    }

    #[test]
    fn redirect_beyond_max_redirect_is_rejected() {
        let (adm, mut args) = fresh();
        args.max_redirect = 1;
        let mut parent_job = Job::new_seed(Url::parse("http://h/a").unwrap());
        parent_job.redirection_level = 1;
        let ctx = AdmissionContext { parent: Some(&parent_job), is_redirect: true, is_seed: false, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://h/b", Some(&parent_job.url), &args, ctx), Outcome::Reject);
    }

    #[test]
    fn level_ceiling_rejects_links_beyond_depth_but_not_redirects() {
        let (adm, mut args) = fresh();
        args.level = 1;
        let mut parent_job = Job::new_seed(Url::parse("http://h/a").unwrap());
        parent_job.level = 1;
        let ctx_link = AdmissionContext { parent: Some(&parent_job), is_redirect: false, is_seed: false, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://h/b", Some(&parent_job.url), &args, ctx_link), Outcome::Reject);

        let ctx_redirect = AdmissionContext { parent: Some(&parent_job), is_redirect: true, is_seed: false, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://h/c", Some(&parent_job.url), &args, ctx_redirect), Outcome::Accept);
    }

    #[test]
    fn span_hosts_false_rejects_cross_host_link() {
        let (adm, mut args) = fresh();
        args.span_hosts = false;
        let parent_job = Job::new_seed(Url::parse("http://h/a").unwrap());
        let ctx = AdmissionContext { parent: Some(&parent_job), is_redirect: false, is_seed: false, parents_scope: &[], is_sitemap_index: false };
        assert_eq!(adm.admit("http://other/b", Some(&parent_job.url), &args, ctx), Outcome::Reject);
    }

    #[test]
    fn robots_defers_until_loaded_then_flushes() {
        let bl = Arc::new(Blacklist::new());
        let hosts = Arc::new(HostRegistry::new());
        let queue = Arc::new(JobQueue::new());
        let adm = Admission::new(bl, hosts, queue);
        let args = args_with(&["-r"]);
        let ctx = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        // First admission creates the host + robots job and defers.
        assert_eq!(adm.admit("http://h/x", None, &args, ctx), Outcome::Deferred);
        // The robots.txt job itself is queued.
        assert_eq!(adm.queue.len(), 1);
        adm.flush_deferred("h", 80, parse_robots("User-agent: *\nDisallow: /x\n", "fetchd"), "http");
        // /x is now rejected by the loaded rules, not enqueued.
        assert_eq!(adm.queue.len(), 1);
    }
}

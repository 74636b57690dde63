//! Shared scaffolding for integration tests: build a `Run` wired to a
//! scratch directory so each test can admit a seed against a
//! `wiremock::MockServer` and drive it through a single worker.

use std::sync::Arc;

use clap::Parser;
use fetchd::args::Args;
use fetchd::dns::DnsCache;
use fetchd::net::NetConfig;
use fetchd::run::Run;
use fetchd::worker::Worker;

pub struct Harness {
    pub run: Arc<Run>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Build a `Run` with `--directory-prefix` pointed at a fresh temp
    /// directory. `extra` supplies any additional CLI flags before the
    /// trailing seed placeholder.
    pub fn new(extra: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut argv = vec!["fetchd", "--directory-prefix", dir.path().to_str().unwrap()];
        argv.extend_from_slice(extra);
        argv.push("http://placeholder.invalid/");
        let args = Args::parse_from(argv);
        let net = NetConfig::from_args(&args);
        let dns = Arc::new(DnsCache::new());
        let client = fetchd::http::build_client(&net, dns.clone()).expect("build test client");
        let run = Arc::new(Run::new(args, net, client, dns));
        Harness { run, dir }
    }

    /// Admit a seed URL, then drain the queue with a single worker so
    /// assertions can run against a quiescent `Run`.
    pub async fn run_to_completion(&self, seed: &str) {
        self.admit(seed);
        self.drain().await;
    }

    pub fn admit(&self, seed: &str) {
        use fetchd::admission::AdmissionContext;
        let ctx = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        self.run.admission.admit(seed, None, &self.run.args, ctx);
    }

    pub async fn drain(&self) {
        let worker = Worker::new(0, self.run.clone());
        worker.run_loop().await;
    }

    pub fn path_under(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }
}

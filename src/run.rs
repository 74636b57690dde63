//! The `Run` context: one value owning every piece of shared state,
//! passed by `Arc` to every worker, in place of process-wide
//! singletons.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Client;

use crate::admission::Admission;
use crate::args::Args;
use crate::blacklist::Blacklist;
use crate::dns::DnsCache;
use crate::host::HostRegistry;
use crate::metalink::{MirrorSelector, Piece};
use crate::net::NetConfig;
use crate::persist::Quota;
use crate::queue::{JobId, JobQueue};

/// Per-job bookkeeping for an in-flight metalink download: which file
/// its parts write into and which mirror to try next.
pub struct ManifestState {
    pub local_path: PathBuf,
    pub selector: MirrorSelector,
    pub total_size: u64,
    /// Indexed by `Part::id` (pieces and parts are built from the same
    /// manifest in the same order), so a landed part's expected hash
    /// can be looked up without re-reading the manifest.
    pub pieces: Vec<Piece>,
}

pub struct Run {
    pub args: Args,
    pub net: NetConfig,
    pub client: Client,
    pub queue: Arc<JobQueue>,
    pub blacklist: Arc<Blacklist>,
    pub hosts: Arc<HostRegistry>,
    pub dns: Arc<DnsCache>,
    pub quota: Arc<Quota>,
    pub admission: Admission,
    pub terminated: AtomicBool,
    pub manifests: Mutex<HashMap<JobId, Arc<ManifestState>>>,
    exit_code: AtomicU8,
}

impl Run {
    /// `dns` is shared with the `reqwest::Client` passed in `client` (see
    /// `http::build_client`) so every connection resolves through the same
    /// cache instead of a second, disconnected one.
    pub fn new(args: Args, net: NetConfig, client: Client, dns: Arc<DnsCache>) -> Self {
        let queue = Arc::new(JobQueue::new());
        let blacklist = Arc::new(Blacklist::new());
        let hosts = Arc::new(HostRegistry::new());
        let quota = Arc::new(Quota::new(args.quota));
        let admission = Admission::new(blacklist.clone(), hosts.clone(), queue.clone());
        Run {
            args,
            net,
            client,
            queue,
            blacklist,
            hosts,
            dns,
            quota,
            admission,
            terminated: AtomicBool::new(false),
            manifests: Mutex::new(HashMap::new()),
            exit_code: AtomicU8::new(0),
        }
    }

    /// Fold one job's terminal error into the run-wide exit status (spec
    /// §6: "lower supersedes higher when multiple conditions occur").
    pub fn report_error(&self, err: &crate::error::FetchError) {
        let code = err.exit_code();
        if code == 0 {
            return;
        }
        loop {
            let current = self.exit_code.load(Ordering::SeqCst);
            if current != 0 && current <= code {
                return;
            }
            if self
                .exit_code
                .compare_exchange(current, code, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn register_manifest(&self, job_id: JobId, state: ManifestState) {
        self.manifests.lock().expect("manifest registry poisoned").insert(job_id, Arc::new(state));
    }

    pub fn manifest_state(&self, job_id: JobId) -> Option<Arc<ManifestState>> {
        self.manifests.lock().expect("manifest registry poisoned").get(&job_id).cloned()
    }

    pub fn manifests_len(&self) -> usize {
        self.manifests.lock().expect("manifest registry poisoned").len()
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.queue.worker_cond.notify_waiters();
        self.queue.main_cond.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

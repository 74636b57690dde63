//! Supervisor: spawns the worker pool, owns `main_cond` and the
//! termination predicate, reads the seed/input-file producer, handles
//! signals, and drives orderly shutdown.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::admission::AdmissionContext;
use crate::run::Run;
use crate::worker::Worker;

pub struct Supervisor {
    run: Arc<Run>,
}

impl Supervisor {
    pub fn new(run: Arc<Run>) -> Self {
        Supervisor { run }
    }

    /// Seed the queue from `args.seeds` and `--input-file`, start
    /// `max_threads` workers, install signal handlers, and block until
    /// the termination predicate holds: `terminated OR (queue.empty AND
    /// no_input_producer) OR quota_exceeded`.
    pub async fn run(&self) -> u8 {
        let signals = self.spawn_signal_handlers();

        for seed in &self.run.args.seeds {
            self.admit_seed(seed);
        }

        let input_task = self.run.args.input_file.clone().map(|path| {
            self.run.queue.register_input_producer();
            let run = self.run.clone();
            tokio::task::spawn_blocking(move || read_input_file(&path, &run))
        });

        let mut workers = Vec::with_capacity(self.run.args.max_threads);
        for id in 0..self.run.args.max_threads {
            let worker = Worker::new(id, self.run.clone());
            workers.push(tokio::spawn(async move { worker.run_loop().await }));
        }

        self.wait_for_termination(input_task).await;

        self.shutdown(workers).await;
        signals.abort();
        self.run.exit_code()
    }

    fn admit_seed(&self, raw: &str) {
        let ctx = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
        self.run.admission.admit(raw, None, &self.run.args, ctx);
    }

    async fn wait_for_termination(&self, input_task: Option<JoinHandle<()>>) {
        loop {
            if self.run.is_terminated() {
                break;
            }
            if self.run.quota.exceeded() {
                info!("quota exceeded, entering shutdown");
                self.run.terminate();
                break;
            }
            if self.run.queue.empty() {
                break;
            }
            tokio::select! {
                _ = self.run.queue.main_cond.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
        if let Some(task) = input_task {
            let _ = task.await;
        }
    }

    /// Broadcast `worker_cond` so any worker parked on an empty-but-not-
    /// done queue wakes and re-checks `terminated`, then join every
    /// worker. Workers finish their current HTTP transaction before
    /// exiting; there is no mid-transaction cancellation.
    async fn shutdown(&self, workers: Vec<JoinHandle<()>>) {
        self.run.terminate();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task did not join cleanly");
            }
        }
        info!(
            quota_used = self.run.quota.used(),
            exit_code = self.run.exit_code(),
            "fetch run complete"
        );
    }

    /// Spawn the three signal watchers: `SIGTERM` sets
    /// `terminated`; `SIGINT` aborts unconditionally by also blowing
    /// away the queue; `SIGPIPE` is drained so its default
    /// process-terminating action never fires.
    fn spawn_signal_handlers(&self) -> JoinHandle<()> {
        let run = self.run.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        return;
                    }
                };
                let mut sigint = match signal(SignalKind::interrupt()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGINT handler");
                        return;
                    }
                };
                let mut sigpipe = match signal(SignalKind::pipe()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGPIPE handler");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("SIGTERM received, finishing in-flight transactions");
                            run.terminate();
                        }
                        _ = sigint.recv() => {
                            warn!("SIGINT received, aborting unconditionally");
                            run.terminate();
                            run.queue.worker_cond.notify_waiters();
                        }
                        _ = sigpipe.recv() => {
                            // Ignored: a broken pipe is surfaced through a
                            // write's return code, not process termination.
                        }
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
                run.terminate();
            }
        })
    }
}

/// Read one seed URL per line from `path` (`-` for standard input),
/// admitting each. Runs on a blocking thread since the readers are
/// synchronous.
fn read_input_file(path: &str, run: &Run) {
    let result = if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map(|_| buf)
    } else {
        std::fs::read_to_string(path)
    };
    match result {
        Ok(contents) => {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let ctx = AdmissionContext { parent: None, is_redirect: false, is_seed: true, parents_scope: &[], is_sitemap_index: false };
                run.admission.admit(line, None, &run.args, ctx);
            }
        }
        Err(e) => warn!(path, error = %e, "failed to read input file"),
    }
    run.queue.deregister_input_producer();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetConfig;
    use clap::Parser;
    use std::io::Write as _;

    fn test_run(extra: &[&str]) -> Arc<Run> {
        let mut argv = vec!["fetchd"];
        argv.extend_from_slice(extra);
        let args = crate::args::Args::parse_from(argv);
        let net = NetConfig::from_args(&args);
        let client = reqwest::Client::new();
        let dns = Arc::new(crate::dns::DnsCache::new());
        Arc::new(Run::new(args, net, client, dns))
    }

    #[test]
    fn report_error_keeps_lowest_nonzero_code() {
        let run = test_run(&["http://h/"]);
        run.report_error(&crate::error::FetchError::Remote4xx { status: 404 }); // 8
        run.report_error(&crate::error::FetchError::Tls("bad cert".into())); // 5
        run.report_error(&crate::error::FetchError::AuthRequired); // 6
        assert_eq!(run.exit_code(), 5);
    }

    #[test]
    fn report_error_ignores_silent_codes() {
        let run = test_run(&["http://h/"]);
        run.report_error(&crate::error::FetchError::QuotaExceeded);
        assert_eq!(run.exit_code(), 0);
    }

    #[test]
    fn read_input_file_admits_each_non_comment_line() {
        let run = test_run(&["--robots=false", "http://seed/"]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://h/a").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "http://h/b").unwrap();
        read_input_file(file.path().to_str().unwrap(), &run);
        assert_eq!(run.queue.len(), 2);
    }
}

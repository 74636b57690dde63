//! src/main.rs
//!
//! Entry point for the fetchd binary.
//!
//! Responsibilities of this file:
//!   1) Parse command-line arguments into a typed `Args` struct (via `clap`).
//!   2) Build a reusable HTTP client (`reqwest::Client`) honoring the
//!      timeout/proxy/https-enforce configuration.
//!   3) Construct the shared `Run` context and hand it to the Supervisor.
//!   4) Exit with the aggregated exit code.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;

use fetchd::args::Args;
use fetchd::dns::DnsCache;
use fetchd::http;
use fetchd::net::NetConfig;
use fetchd::run::Run;
use fetchd::supervisor::Supervisor;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let net = NetConfig::from_args(&args);
    let dns = Arc::new(DnsCache::new());
    let client = match http::build_client(&net, dns.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fetchd: failed to build http client: {e}");
            return std::process::ExitCode::from(2);
        }
    };

    let run = Arc::new(Run::new(args, net, client, dns));
    let supervisor = Supervisor::new(run);
    std::process::ExitCode::from(supervisor.run().await)
}

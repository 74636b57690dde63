//! Shared runtime network configuration (timeouts, proxy settings) used
//! by `http` and `dns`. Kept separate from `args::Args` so non-CLI
//! callers (tests) can build a `Run` without clap.

use std::time::Duration;

use crate::args::{Args, HttpsEnforce};

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub https_enforce: HttpsEnforce,
    pub https_only: bool,
    pub user_agent: String,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Read `http_proxy`/`https_proxy`/`no_proxy` verbatim.
    pub fn from_env() -> Self {
        ProxyConfig {
            http_proxy: std::env::var("http_proxy").ok(),
            https_proxy: std::env::var("https_proxy").ok(),
            no_proxy: std::env::var("no_proxy").ok(),
        }
    }
}

impl NetConfig {
    pub fn from_args(args: &Args) -> Self {
        NetConfig {
            dns_timeout: args.dns_timeout(),
            connect_timeout: args.connect_timeout(),
            read_timeout: args.read_timeout(),
            https_enforce: args.https_enforce,
            https_only: args.https_only,
            user_agent: format!("fetchd/{}", env!("CARGO_PKG_VERSION")),
            proxy: ProxyConfig::from_env(),
        }
    }
}

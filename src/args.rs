//! Command-line surface.
//!
//! A single `#[derive(Parser)]` struct with doc comments driving
//! `--help`, covering the full recursive-fetch flag set.

use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Recursive HTTP(S) fetcher")]
pub struct Args {
    /// One or more seed URLs to fetch.
    pub seeds: Vec<String>,

    /// Read additional seed URLs from a file ("-" for standard input).
    #[arg(long = "input-file")]
    pub input_file: Option<String>,

    /// Follow links discovered in fetched documents.
    #[arg(short = 'r', long = "recursive", default_value_t = false)]
    pub recursive: bool,

    /// Recursion depth ceiling (0 = unlimited).
    #[arg(short = 'l', long = "level", default_value_t = 0)]
    pub level: u32,

    /// Disable host-scope checking during recursion.
    #[arg(short = 'H', long = "span-hosts", default_value_t = false)]
    pub span_hosts: bool,

    /// Comma-separated host allowlist for recursion.
    #[arg(long = "domains", default_value = "")]
    pub domains: String,

    /// Comma-separated host denylist for recursion.
    #[arg(long = "exclude-domains", default_value = "")]
    pub exclude_domains: String,

    /// Disallow ascending to parent directories during recursion.
    #[arg(short = 'n', long = "no-parent", default_value_t = false)]
    pub no_parent: bool,

    /// Honor robots.txt.
    #[arg(long = "robots", action = clap::ArgAction::Set, default_value_t = true)]
    pub robots: bool,

    /// Reject any non-https seed or link.
    #[arg(long = "https-only", default_value_t = false)]
    pub https_only: bool,

    /// Load credentials for Basic-auth challenges from `$HOME/.netrc`.
    #[arg(long = "netrc", default_value_t = false)]
    pub netrc: bool,

    /// Fallback policy when a server replies over plain HTTP under an
    /// https-enforcing configuration.
    #[arg(long = "https-enforce", value_enum, default_value_t = HttpsEnforce::None)]
    pub https_enforce: HttpsEnforce,

    /// Resume partially-downloaded files with a Range request.
    #[arg(short = 'c', long = "continue", default_value_t = false)]
    pub continue_download: bool,

    /// Use If-Modified-Since and preserve remote mtimes.
    #[arg(short = 'N', long = "timestamping", default_value_t = false)]
    pub timestamping: bool,

    /// Maximum redirection hops before giving up.
    #[arg(long = "max-redirect", default_value_t = 20)]
    pub max_redirect: u32,

    /// Maximum attempts per job before declaring final failure.
    #[arg(short = 't', long = "tries", default_value_t = 3)]
    pub tries: u32,

    /// Backoff base, in seconds, between retries.
    #[arg(long = "waitretry", default_value_t = 1)]
    pub waitretry: u64,

    /// Run-wide byte quota; 0 disables the check.
    #[arg(long = "quota", default_value_t = 0)]
    pub quota: u64,

    /// Write everything to a single named sink ("-" for stdout).
    #[arg(short = 'O', long = "output-document")]
    pub output_document: Option<String>,

    /// Root directory under which files are written.
    #[arg(short = 'P', long = "directory-prefix", default_value = ".")]
    pub directory_prefix: String,

    /// Disable directory creation; write everything flat.
    #[arg(long = "no-directories", default_value_t = false)]
    pub no_directories: bool,

    /// Omit the host-name directory component.
    #[arg(long = "no-host-directories", default_value_t = false)]
    pub no_host_directories: bool,

    /// Include a protocol-named directory component (http/https).
    #[arg(long = "protocol-directories", default_value_t = false)]
    pub protocol_directories: bool,

    /// Strip this many leading path components when laying out files.
    #[arg(long = "cut-dirs", default_value_t = 0)]
    pub cut_dirs: usize,

    /// Allow overwriting existing files instead of suffixing `.N`.
    #[arg(long = "clobber", default_value_t = false)]
    pub clobber: bool,

    /// Filename sanitization mode.
    #[arg(long = "restrict-file-names", value_enum, default_value_t = RestrictFileNames::Unix)]
    pub restrict_file_names: RestrictFileNames,

    /// Append `.html`/`.css` to derived filenames when the content-type implies it.
    #[arg(long = "adjust-extension", default_value_t = true)]
    pub adjust_extension: bool,

    /// Maximum number of concurrent worker threads.
    #[arg(long = "max-threads", default_value_t = 8)]
    pub max_threads: usize,

    /// Segment size, in bytes, for single-origin chunked downloads.
    #[arg(long = "chunk-size", default_value_t = 0)]
    pub chunk_size: u64,

    /// DNS resolution timeout in milliseconds (-1 = wait indefinitely).
    #[arg(long = "dns-timeout", default_value_t = 5_000, allow_negative_numbers = true)]
    pub dns_timeout_ms: i64,

    /// TCP/TLS connect timeout in milliseconds.
    #[arg(long = "connect-timeout", default_value_t = 10_000)]
    pub connect_timeout_ms: i64,

    /// Socket read timeout in milliseconds.
    #[arg(long = "read-timeout", default_value_t = 30_000)]
    pub read_timeout_ms: i64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpsEnforce {
    None,
    Soft,
    Hard,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictFileNames {
    Unix,
    Windows,
    Ascii,
    Nocontrol,
    Uppercase,
    Lowercase,
}

impl Args {
    pub fn waitretry_duration(&self) -> Duration {
        Duration::from_secs(self.waitretry)
    }

    pub fn domains_list(&self) -> Vec<String> {
        split_csv(&self.domains)
    }

    pub fn exclude_domains_list(&self) -> Vec<String> {
        split_csv(&self.exclude_domains)
    }

    pub fn dns_timeout(&self) -> Option<Duration> {
        ms_to_timeout(self.dns_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        ms_to_timeout(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        ms_to_timeout(self.read_timeout_ms)
    }
}

/// `0` = non-blocking, `-1` = wait indefinitely, positive = a ceiling in
/// milliseconds. `None` represents "wait indefinitely."
fn ms_to_timeout(ms: i64) -> Option<Duration> {
    if ms < 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

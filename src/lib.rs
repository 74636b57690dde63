//! `fetchd`: a recursive, multi-threaded HTTP/HTTPS downloader engine.
//!
//! The binary entry point lives in `main.rs`; this library exposes the
//! engine's modules so integration tests under `tests/` can drive the
//! admission pipeline, worker, and persistence logic directly against a
//! mock HTTP server.

pub mod admission;
pub mod args;
pub mod blacklist;
pub mod discovery;
pub mod dns;
pub mod error;
pub mod host;
pub mod http;
pub mod metalink;
pub mod net;
pub mod netrc;
pub mod parsers;
pub mod persist;
pub mod queue;
pub mod robots;
pub mod run;
pub mod supervisor;
pub mod url;
pub mod worker;

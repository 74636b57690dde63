//! Persistence: filename derivation, directory layout, clobber/
//! suffixing, continue-from-offset, and quota pre-check.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::args::{Args, RestrictFileNames};
use crate::error::FetchError;
use crate::url::Url;

/// Derive the local filename for `url`, honoring `-P`, `-nd`/`-nH`/
/// `--protocol-directories`/`--cut-dirs`, and `--restrict-file-names`.
pub fn derive_path(url: &Url, args: &Args) -> PathBuf {
    if let Some(single) = &args.output_document {
        return PathBuf::from(single);
    }

    let mut components: Vec<String> = Vec::new();
    components.push(args.directory_prefix.clone());

    if args.protocol_directories {
        components.push(url.scheme().to_string());
    }
    if !args.no_host_directories {
        components.push(url.host().to_string());
    }

    let mut segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    if args.cut_dirs > 0 {
        segments = segments.into_iter().skip(args.cut_dirs).collect();
    }

    let filename = if segments.is_empty() {
        "index.html".to_string()
    } else {
        segments.pop().unwrap().to_string()
    };

    if args.no_directories {
        components = vec![args.directory_prefix.clone()];
    } else {
        for seg in &segments {
            components.push(sanitize_component(seg, args.restrict_file_names));
        }
    }
    components.push(sanitize_component(&filename, args.restrict_file_names));

    components.iter().fold(PathBuf::new(), |mut acc, c| {
        acc.push(c);
        acc
    })
}

/// Sanitize one path component per `--restrict-file-names`: control
/// characters are escaped as `%HH`.
pub fn sanitize_component(name: &str, mode: RestrictFileNames) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        let forbidden = match mode {
            RestrictFileNames::Unix => ch == '/' || ch == '\0',
            RestrictFileNames::Windows => "\\/:*?\"<>|".contains(ch) || ch.is_control(),
            RestrictFileNames::Ascii => !ch.is_ascii() || ch.is_control(),
            RestrictFileNames::Nocontrol => ch.is_control(),
            RestrictFileNames::Uppercase | RestrictFileNames::Lowercase => ch.is_control(),
        };
        if forbidden {
            for byte in ch.to_string().as_bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(ch);
        }
    }
    match mode {
        RestrictFileNames::Uppercase => out.to_ascii_uppercase(),
        RestrictFileNames::Lowercase => out.to_ascii_lowercase(),
        _ => out,
    }
}

/// Append `.html`/`.css` when the content-type implies it and the
/// derived name lacks that extension.
pub fn adjust_extension(path: &Path, content_type: Option<&str>) -> PathBuf {
    let Some(ct) = content_type else { return path.to_path_buf() };
    let ext = if ct.contains("text/html") {
        Some("html")
    } else if ct.contains("text/css") {
        Some("css")
    } else {
        None
    };
    match ext {
        Some(ext) if path.extension().map(|e| e != ext).unwrap_or(true) => {
            let mut new_path = path.as_os_str().to_os_string();
            new_path.push(".");
            new_path.push(ext);
            PathBuf::from(new_path)
        }
        _ => path.to_path_buf(),
    }
}

/// Resolve a collision under `clobber = false` by trying `name.1`,
/// `name.2`, … up to 999.
pub fn resolve_exclusive_name(path: &Path) -> Result<PathBuf, FetchError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    for n in 1..=999u32 {
        let candidate = append_suffix(path, n);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(FetchError::IoWrite(format!(
        "exhausted 999 collision suffixes for {}",
        path.display()
    )))
}

fn append_suffix(path: &Path, n: u32) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(format!(".{n}"));
    PathBuf::from(os)
}

/// What the caller should do with a fetched body, decided purely from
/// flags and the computed path.
pub enum WriteTarget {
    Stdout,
    Discard,
    File(PathBuf),
}

pub struct WritePolicy {
    pub spider: bool,
    pub delete_after: bool,
    pub clobber: bool,
    pub append: bool,
}

pub fn choose_write_target(path: &Path, policy: &WritePolicy) -> Result<WriteTarget, FetchError> {
    let is_stdout = path.as_os_str() == "-";
    if policy.spider || policy.delete_after {
        return Ok(if is_stdout { WriteTarget::Stdout } else { WriteTarget::Discard });
    }
    if is_stdout {
        return Ok(WriteTarget::Stdout);
    }
    if policy.clobber || policy.append {
        return Ok(WriteTarget::File(path.to_path_buf()));
    }
    resolve_exclusive_name(path).map(WriteTarget::File)
}

/// Open `path` for writing per `append`/`clobber`, creating parent
/// directories first.
pub fn open_for_write(path: &Path, append: bool) -> Result<std::fs::File, FetchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(FetchError::Io)?;
        }
    }
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    opts.open(path).map_err(FetchError::Io)
}

/// Preserve the remote `Last-Modified` timestamp on disk.
pub fn set_mtime(path: &Path, last_modified: chrono::DateTime<chrono::Utc>) -> Result<(), FetchError> {
    let system_time: std::time::SystemTime = last_modified.into();
    let file = OpenOptions::new().write(true).open(path).map_err(FetchError::Io)?;
    file.set_modified(system_time).map_err(FetchError::Io)?;
    Ok(())
}

/// Run-wide write ceiling: a single atomic "add-and-return-prior" so
/// writers that would cross the ceiling never partially write.
pub struct Quota {
    limit: u64,
    used: std::sync::atomic::AtomicU64,
}

impl Quota {
    pub fn new(limit: u64) -> Self {
        Quota { limit, used: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Reserve `amount` bytes. Returns `Err(QuotaExceeded)` without
    /// mutating the counter if the reservation would cross the ceiling
    /// (when `limit > 0`).
    pub fn reserve(&self, amount: u64) -> Result<(), FetchError> {
        use std::sync::atomic::Ordering;
        if self.limit == 0 {
            self.used.fetch_add(amount, Ordering::SeqCst);
            return Ok(());
        }
        loop {
            let prior = self.used.load(Ordering::SeqCst);
            let after = prior + amount;
            if after > self.limit {
                warn!(prior, amount, limit = self.limit, "quota would be exceeded");
                return Err(FetchError::QuotaExceeded);
            }
            if self
                .used
                .compare_exchange(prior, after, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!(after, limit = self.limit, "quota reserved");
                return Ok(());
            }
        }
    }

    pub fn exceeded(&self) -> bool {
        if self.limit == 0 {
            return false;
        }
        self.used.load(std::sync::atomic::Ordering::SeqCst) >= self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(std::sync::atomic::Ordering::SeqCst)
    }
}

pub fn write_body(path: &Path, body: &[u8], append: bool) -> Result<(), FetchError> {
    let mut file = open_for_write(path, append)?;
    file.write_all(body).map_err(FetchError::Io)?;
    Ok(())
}

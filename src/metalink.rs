//! Metalink orchestrator: splits a target into parts, schedules
//! mirrors round-robin, writes parts at their byte offset, and
//! verifies checksums before declaring completion.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::FetchError;
use crate::queue::Part;
use crate::url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub position: u64,
    pub length: u64,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub url: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub size: u64,
    pub pieces: Vec<Piece>,
    pub mirrors: Vec<Mirror>,
    pub file_hash: Option<String>,
}

impl Manifest {
    /// Build the part list from `pieces`, each starting as
    /// `inuse = false, done = false`.
    pub fn build_parts(&self) -> Vec<Part> {
        self.pieces
            .iter()
            .enumerate()
            .map(|(id, piece)| Part {
                id,
                position: piece.position,
                length: piece.length,
                done: false,
                inuse: false,
            })
            .collect()
    }

    /// Mirrors sorted by ascending priority (lower = preferred), as the
    /// manifest's wire order is not guaranteed to already be sorted.
    pub fn sorted_mirrors(&self) -> Vec<&Mirror> {
        let mut mirrors: Vec<&Mirror> = self.mirrors.iter().collect();
        mirrors.sort_by_key(|m| m.priority);
        mirrors
    }
}

/// Round-robin mirror selection by `worker_id % mirror_count`, advancing
/// on each attempt.
pub struct MirrorSelector {
    mirrors: Vec<Url>,
    cursor: AtomicUsize,
}

impl MirrorSelector {
    pub fn new(mirrors: Vec<Url>) -> Self {
        MirrorSelector { mirrors, cursor: AtomicUsize::new(0) }
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Pick the next mirror for `worker_id`, advancing the shared cursor
    /// so repeated failures fan out across mirrors instead of hammering
    /// one.
    pub fn next_for(&self, worker_id: usize) -> Option<&Url> {
        if self.mirrors.is_empty() {
            return None;
        }
        let step = self.cursor.fetch_add(1, Ordering::Relaxed);
        let idx = (worker_id + step) % self.mirrors.len();
        self.mirrors.get(idx)
    }
}

/// Write `data` at `position` into `path`, opened `O_WRONLY|O_CREAT`.
/// `total_size` must be the manifest's full file size, the same value
/// on every call regardless of which part is landing —
/// `set_len` is an absolute resize, so passing a part's own end offset
/// here would truncate bytes already written by a higher-offset part
/// that happened to land first.
pub fn write_part_at(path: &Path, position: u64, data: &[u8], total_size: u64) -> Result<(), FetchError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .map_err(FetchError::Io)?;
    file.set_len(total_size).map_err(FetchError::Io)?;
    file.seek(SeekFrom::Start(position)).map_err(FetchError::Io)?;
    file.write_all(data).map_err(FetchError::Io)?;
    Ok(())
}

/// Verify a single piece's hash, when the manifest supplied one.
pub fn piece_hash_matches(data: &[u8], expected_hex: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    hex_encode(&digest) == expected_hex.to_ascii_lowercase()
}

/// Full-file checksum over the assembled target, run only once every
/// part is `done`.
pub fn file_hash_matches(path: &Path, expected_hex: &str) -> Result<bool, FetchError> {
    let data = std::fs::read(path).map_err(FetchError::Io)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let digest = hasher.finalize();
    Ok(hex_encode(&digest) == expected_hex.to_ascii_lowercase())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_manifest() -> Manifest {
        Manifest {
            name: "file.bin".into(),
            size: 20,
            pieces: vec![
                Piece { position: 0, length: 10, hash: None },
                Piece { position: 10, length: 10, hash: None },
            ],
            mirrors: vec![
                Mirror { url: "http://m1/file.bin".into(), priority: 1 },
                Mirror { url: "http://m2/file.bin".into(), priority: 0 },
            ],
            file_hash: None,
        }
    }

    #[test]
    fn build_parts_starts_undone_and_unused() {
        let m = sample_manifest();
        let parts = m.build_parts();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.done && !p.inuse));
    }

    #[test]
    fn sorted_mirrors_orders_by_priority() {
        let m = sample_manifest();
        let sorted = m.sorted_mirrors();
        assert_eq!(sorted[0].url, "http://m2/file.bin");
    }

    #[test]
    fn mirror_selector_round_robins() {
        let selector = MirrorSelector::new(vec![
            Url::parse("http://m1/f").unwrap(),
            Url::parse("http://m2/f").unwrap(),
        ]);
        let first = selector.next_for(0).unwrap().clone();
        let second = selector.next_for(0).unwrap().clone();
        assert_ne!(first.as_str(), second.as_str());
    }

    #[test]
    fn parts_write_at_correct_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_part_at(&path, 10, b"0123456789", 20).unwrap();
        write_part_at(&path, 0, b"abcdefghij", 20).unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[0..10], b"abcdefghij");
        assert_eq!(&content[10..20], b"0123456789");
    }

    #[test]
    fn piece_hash_matches_known_digest() {
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde";
        assert!(piece_hash_matches(b"hello world", expected));
        assert!(!piece_hash_matches(b"hello there", expected));
    }

    #[test]
    fn file_hash_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde";
        assert!(file_hash_matches(&path, expected).unwrap());
        assert!(!file_hash_matches(&path, "deadbeef").unwrap());
    }
}

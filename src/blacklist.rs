//! Admitted-URL idempotency guard.
//!
//! Despite the name, this is not a denylist: membership means "already
//! queued once," used to stop the same canonical URL from being
//! admitted twice in one run.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct Blacklist {
    seen: Mutex<HashSet<String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the canonical form of `url`. Returns `true` on first
    /// insertion, `false` if it was already present.
    pub fn add(&self, canonical: &str) -> bool {
        let mut seen = self.seen.lock().expect("blacklist mutex poisoned");
        seen.insert(canonical.to_string())
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.seen.lock().expect("blacklist mutex poisoned").contains(canonical)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("blacklist mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insertion_returns_true() {
        let bl = Blacklist::new();
        assert!(bl.add("http://h/a"));
        assert!(!bl.add("http://h/a"));
    }

    #[test]
    fn fragment_free_canonical_keys_are_shared() {
        let bl = Blacklist::new();
        // Caller is responsible for passing fragment-free canonical
        // forms; the blacklist itself just does set logic.
        assert!(bl.add("http://h/a"));
        assert!(!bl.add("http://h/a"));
        assert!(bl.contains("http://h/a"));
    }
}

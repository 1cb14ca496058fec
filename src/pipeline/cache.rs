//! Filesystem-backed response cache.
//!
//! One raw-response file per batch, written after the first successful
//! provider call and read before every subsequent call. Entries survive
//! process restarts, so re-running the pipeline over the same document costs
//! nothing in provider calls.
//!
//! ## Keying
//!
//! Entries are keyed by batch index **and** a fingerprint of the batch's
//! page indices plus the text budget. An index alone would be fragile: if
//! the budget changes between runs, batch 2 can suddenly cover different
//! pages, and replaying the old response would silently attach the wrong
//! data to it. With the fingerprint in the name, a re-plan simply misses
//! the cache and calls the service afresh.
//!
//! ## Concurrency
//!
//! Workers are partitioned by batch index, so no two tasks in one run ever
//! touch the same entry; plain `fs::read`/`fs::write` atomicity is enough
//! and no locking is needed.

use crate::error::InvoxError;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Handle to the cache directory. Cheap to clone into worker tasks.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    /// Open the cache, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self, InvoxError> {
        fs::create_dir_all(dir).map_err(|e| InvoxError::CacheDirFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, batch_index: usize, fingerprint: u64) -> PathBuf {
        self.dir
            .join(format!("batch-{batch_index:04}-{fingerprint:016x}.json"))
    }

    /// Read the cached raw response for a batch, if one exists.
    ///
    /// Unreadable entries are treated as misses; the worker then re-fetches
    /// and overwrites them.
    pub fn read(&self, batch_index: usize, fingerprint: u64) -> Option<String> {
        let path = self.entry_path(batch_index, fingerprint);
        match fs::read_to_string(&path) {
            Ok(content) => {
                debug!("cache hit for batch {batch_index}: {}", path.display());
                Some(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("cache entry {} unreadable: {e}", path.display());
                None
            }
        }
    }

    /// Persist the raw response for a batch.
    ///
    /// A failed write is logged and swallowed: the current run already holds
    /// the response in memory, only the next run loses the shortcut.
    pub fn write(&self, batch_index: usize, fingerprint: u64, content: &str) {
        let path = self.entry_path(batch_index, fingerprint);
        if let Err(e) = fs::write(&path, content) {
            warn!("failed to write cache entry {}: {e}", path.display());
        }
    }
}

/// Fingerprint of a batch's identity: the pages it covers and the budget
/// that shaped the plan.
pub fn batch_fingerprint(page_indices: &[usize], budget: usize) -> u64 {
    let mut hasher = ahash::AHasher::default();
    budget.hash(&mut hasher);
    page_indices.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let fp = batch_fingerprint(&[0, 1], 6_000);

        assert_eq!(cache.read(0, fp), None);
        cache.write(0, fp, r#"{"total": 9}"#);
        assert_eq!(cache.read(0, fp).as_deref(), Some(r#"{"total": 9}"#));
    }

    #[test]
    fn entries_are_partitioned_by_batch_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();
        let fp = batch_fingerprint(&[0], 6_000);

        cache.write(0, fp, "zero");
        assert_eq!(cache.read(1, fp), None);
    }

    #[test]
    fn fingerprint_changes_with_budget_and_pages() {
        let a = batch_fingerprint(&[0, 1], 6_000);
        let b = batch_fingerprint(&[0, 1], 4_000);
        let c = batch_fingerprint(&[0, 2], 6_000);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn budget_change_misses_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path()).unwrap();

        cache.write(2, batch_fingerprint(&[4, 5], 6_000), "old plan");
        // Same index, different plan shape: must not replay.
        assert_eq!(cache.read(2, batch_fingerprint(&[4], 3_000)), None);
    }

    #[test]
    fn cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = batch_fingerprint(&[0], 1_000);
        {
            let cache = ResponseCache::open(dir.path()).unwrap();
            cache.write(0, fp, "persisted");
        }
        let cache = ResponseCache::open(dir.path()).unwrap();
        assert_eq!(cache.read(0, fp).as_deref(), Some("persisted"));
    }
}

//! Progress callbacks and the append-only timing log.
//!
//! Inject an [`Arc<dyn ExtractionProgress>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each batch.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database
//! record, or a terminal progress bar — without the library knowing anything
//! about how the host application communicates. The trait is `Send + Sync`
//! so it works correctly when batches are processed concurrently.
//!
//! [`FileLog`] is the separate, file-backed sink for the per-batch and
//! total timing lines; it exists so a batch run leaves a plain-text audit
//! trail even when nobody is watching a progress bar.

use crate::error::InvoxError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Called by the pipeline as it processes each batch.
///
/// Batches complete out of order under concurrency, so `on_batch_*` methods
/// may be called concurrently from different tasks; implementations must
/// protect shared mutable state. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ExtractionProgress: Send + Sync {
    /// Called once after planning, before any batch is dispatched.
    fn on_run_start(&self, total_batches: usize) {
        let _ = total_batches;
    }

    /// Called just before a batch's worker begins (cache check included).
    fn on_batch_start(&self, batch_index: usize, total_batches: usize) {
        let _ = (batch_index, total_batches);
    }

    /// Called when a batch yields a structured record.
    ///
    /// `from_cache` is true when the raw response was replayed from disk.
    fn on_batch_complete(&self, batch_index: usize, total_batches: usize, from_cache: bool) {
        let _ = (batch_index, total_batches, from_cache);
    }

    /// Called when a batch ends as `data = None` after retries.
    fn on_batch_failed(&self, batch_index: usize, total_batches: usize, error: &str) {
        let _ = (batch_index, total_batches, error);
    }

    /// Called once after every batch has been collected and reordered.
    fn on_run_complete(&self, total_batches: usize, extracted: usize) {
        let _ = (total_batches, extracted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl ExtractionProgress for NoopProgress {}

/// Convenience alias matching the type stored in
/// [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgress>;

/// Append-only plain-text timing log.
///
/// Cheap to clone and share across workers; when disabled every append is a
/// no-op. Write failures are logged and swallowed — a full disk must not
/// fail an otherwise healthy extraction run.
#[derive(Clone)]
pub struct FileLog {
    inner: Option<Arc<Mutex<File>>>,
}

impl FileLog {
    /// A sink that drops every line.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Open (or create) the log file in append mode.
    pub fn open(path: &Path) -> Result<Self, InvoxError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| InvoxError::LogOpenFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            inner: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Open the configured path, or return a disabled sink.
    pub fn from_path(path: Option<&Path>) -> Result<Self, InvoxError> {
        match path {
            Some(p) => Self::open(p),
            None => Ok(Self::disabled()),
        }
    }

    /// Append one line. No-op when disabled.
    pub fn append(&self, line: &str) {
        let Some(ref file) = self.inner else {
            return;
        };
        match file.lock() {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!("failed to append to timing log: {e}");
                }
            }
            Err(_) => warn!("timing log mutex poisoned, line dropped"),
        }
    }
}

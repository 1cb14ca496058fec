//! Output types for extraction runs.
//!
//! [`ExtractionOutput`] is what the top-level `extract*` functions return:
//! the ordered record sequence (one slot per batch, `None` where a batch
//! failed), the per-batch details behind those slots, and run statistics.

use crate::error::BatchError;
use crate::schema::InvoiceRecord;
use serde::{Deserialize, Serialize};

/// Result of processing a single batch.
///
/// Always produced, success or failure: a failed batch carries
/// `data = None` and an explanatory [`BatchError`] instead of aborting its
/// siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Position of the batch in original page order (0-indexed).
    pub batch_index: usize,

    /// 0-indexed pages that made up the batch.
    pub pages: Vec<usize>,

    /// The parsed record, or None when the batch could not be recovered.
    pub data: Option<InvoiceRecord>,

    /// Wall-clock time spent on this batch, cache reads included.
    pub duration_ms: u64,

    /// Remote attempts beyond the first (0 when the cache answered).
    pub retries: u8,

    /// True when the raw response came from the on-disk cache.
    pub from_cache: bool,

    /// Why `data` is None, when it is.
    pub error: Option<BatchError>,
}

/// Aggregate statistics for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages rendered from the document.
    pub total_pages: usize,
    /// Pages whose text came from the OCR fallback.
    pub ocr_pages: usize,
    /// Batches planned from the page sequence.
    pub total_batches: usize,
    /// Batches that produced a structured record.
    pub extracted_batches: usize,
    /// Batches that ended as `data = None`.
    pub failed_batches: usize,
    /// Batches answered from the response cache.
    pub cached_batches: usize,
    /// Milliseconds spent rendering and OCR-ing pages.
    pub render_duration_ms: u64,
    /// Milliseconds spent in the worker pool (network + cache + parse).
    pub llm_duration_ms: u64,
    /// End-to-end milliseconds for the run.
    pub total_duration_ms: u64,
}

/// Complete output of an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// One entry per batch, in batch-index order. `None` marks a batch that
    /// failed after retries; successful siblings are unaffected. This is the
    /// sequence callers serialise as a JSON array.
    pub records: Vec<Option<InvoiceRecord>>,

    /// Per-batch details (timing, retries, cache hits, errors) behind
    /// `records`, in the same order.
    pub batches: Vec<BatchRecord>,

    /// Run statistics.
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Records that parsed successfully, in order, nulls skipped.
    pub fn successful_records(&self) -> impl Iterator<Item = &InvoiceRecord> {
        self.records.iter().filter_map(|r| r.as_ref())
    }
}

//! Error types for the invox library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`InvoxError`] — **Fatal**: the extraction cannot proceed at all
//!   (document cannot be opened, provider not configured, cache directory
//!   unwritable). Returned as `Err(InvoxError)` from the top-level
//!   `extract*` functions.
//!
//! * [`BatchError`] — **Non-fatal**: a single batch failed (provider error
//!   after retries, unparsable response) but all other batches are fine.
//!   Stored inside [`crate::output::BatchRecord`]; the batch's slot in the
//!   final record sequence holds `None` instead of a record.
//!
//! * [`ServiceError`] — failure of one call to the remote inference
//!   service, classified so the worker knows whether a retry is worthwhile.
//!
//! The separation lets callers decide their own tolerance: inspect the null
//! entries, log and continue, or collect all batch errors for a report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invox library.
///
/// Batch-level failures use [`BatchError`] and are stored in
/// [`crate::output::BatchRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum InvoxError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document bytes could not be opened as a PDF or as an image.
    /// This is the only per-document condition that aborts a run; a single
    /// bad page inside an otherwise readable document never does.
    #[error("cannot open document '{filename}': {detail}")]
    DocumentUnreadable { filename: String, detail: String },

    /// The filename extension names a format the renderer does not handle.
    #[error("unsupported document format: '{filename}' (expected a PDF or a raster image)")]
    UnsupportedFormat { filename: String },

    /// PDF requires a password but none was provided.
    #[error("document '{filename}' is encrypted and requires a password")]
    PasswordRequired { filename: String },

    /// A password was provided but it is wrong.
    #[error("wrong password for document '{filename}'")]
    WrongPassword { filename: String },

    /// Tesseract could not be initialised or failed on a page raster.
    /// Surfaced internally; the renderer degrades to an empty-text page.
    #[error("OCR failed on page {page}: {detail}")]
    OcrFailed { page: usize, detail: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the response-cache directory.
    #[error("failed to create cache directory '{path}': {source}")]
    CacheDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not open the append-only timing log.
    #[error("failed to open log file '{path}': {source}")]
    LogOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output file (CLI `--out`).
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single batch.
///
/// Stored alongside [`crate::output::BatchRecord`] when a batch fails.
/// Sibling batches and the overall run are unaffected; the failed batch
/// contributes a `None` entry at its index in the final record sequence.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum BatchError {
    /// The remote call failed after all retries.
    #[error("batch {batch}: inference call failed after {retries} retries: {detail}")]
    LlmFailed {
        batch: usize,
        retries: u8,
        detail: String,
    },

    /// The service kept returning empty (or fence-only) content.
    #[error("batch {batch}: empty response after {retries} retries")]
    EmptyResponse { batch: usize, retries: u8 },

    /// The response text was not a valid JSON object.
    #[error("batch {batch}: response is not valid JSON: {detail}")]
    MalformedResponse { batch: usize, detail: String },
}

/// Failure of a single call to the remote inference service.
///
/// [`Throttled`](ServiceError::Throttled) signals rate limiting and is the
/// only class the worker retries; everything else fails the attempt
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The provider signalled rate limiting (HTTP 429 or equivalent).
    #[error("inference service throttled the request: {detail}")]
    Throttled { detail: String },

    /// Any other provider failure (auth, network, 5xx, content filter).
    #[error("inference service call failed: {detail}")]
    Failed { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_display() {
        let e = BatchError::LlmFailed {
            batch: 3,
            retries: 2,
            detail: "HTTP 500".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("batch 3"), "got: {msg}");
        assert!(msg.contains("HTTP 500"));
    }

    #[test]
    fn malformed_response_display() {
        let e = BatchError::MalformedResponse {
            batch: 0,
            detail: "expected value at line 1".into(),
        };
        assert!(e.to_string().contains("not valid JSON"));
    }

    #[test]
    fn service_error_classification() {
        let throttled = ServiceError::Throttled {
            detail: "429".into(),
        };
        let failed = ServiceError::Failed {
            detail: "boom".into(),
        };
        assert!(matches!(throttled, ServiceError::Throttled { .. }));
        assert!(matches!(failed, ServiceError::Failed { .. }));
    }

    #[test]
    fn document_unreadable_display() {
        let e = InvoxError::DocumentUnreadable {
            filename: "inv.pdf".into(),
            detail: "truncated xref".into(),
        };
        assert!(e.to_string().contains("inv.pdf"));
        assert!(e.to_string().contains("truncated xref"));
    }
}

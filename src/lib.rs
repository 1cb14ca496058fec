//! # invox
//!
//! Extract structured billing and usage data from invoice documents (PDF or
//! raster image) using Vision Language Models.
//!
//! ## Why this crate?
//!
//! Invoices are where layout goes to die — multi-column line items, nested
//! usage tables, totals scattered across pages. Template-based parsers break
//! on every new vendor. Instead this crate hands each page's text *and* a
//! rendered image to a VLM and asks for one JSON object per page batch,
//! with provider- and category-level usage aggregates computed by the model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document (bytes + filename)
//!  │
//!  ├─ 1. Render  per page: native text via pdfium, Tesseract OCR fallback,
//!  │             PNG payload (CPU-bound, spawn_blocking)
//!  ├─ 2. Plan    greedy batches under a cumulative text budget
//!  ├─ 3. Extract concurrent workers: cache → VLM call → retry → parse
//!  └─ 4. Collect reorder by batch index → ordered records (nulls included)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invox::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let bytes = std::fs::read("invoice.pdf")?;
//!     let output = extract(bytes, "invoice.pdf", &config).await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&output.records)?);
//!     eprintln!(
//!         "{}/{} batches extracted, {} from cache",
//!         output.stats.extracted_batches,
//!         output.stats.total_batches,
//!         output.stats.cached_batches,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Partial failure
//!
//! A batch whose response cannot be parsed — or whose provider call fails
//! after retries — yields `None` at its index in `output.records`. Sibling
//! batches are unaffected; the run only errors when the document itself
//! cannot be opened.
//!
//! ## Caching
//!
//! Every raw provider response is persisted under the cache directory,
//! keyed by batch index plus a fingerprint of the batch's pages and the
//! text budget. Re-running over the same document replays the responses
//! for free; pass `force_refresh` to call the provider again.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invox` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invox = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{BatchError, InvoxError, ServiceError};
pub use extract::{extract, extract_pages, extract_path, extract_sync};
pub use output::{BatchRecord, ExtractionOutput, ExtractionStats};
pub use pipeline::llm::{InferenceRequest, InferenceService, ProviderService};
pub use pipeline::plan::Batch;
pub use pipeline::render::Page;
pub use progress::{ExtractionProgress, FileLog, NoopProgress, ProgressCallback};
pub use schema::InvoiceRecord;

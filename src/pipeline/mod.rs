//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the OCR backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ plan ──▶ llm ──▶ reorder
//! (path/URL) (pdfium   (budget  (cache,  (by batch
//!             + OCR)    greedy)  retry,   index)
//!                                parse)
//! ```
//!
//! 1. [`input`]  — canonicalise a user-supplied path or URL to document bytes
//! 2. [`render`] — per page: native text, OCR fallback, PNG payload; runs in
//!    `spawn_blocking` because pdfium and Tesseract are not async-safe
//! 3. [`plan`]   — partition the page sequence into contiguous batches under
//!    the text budget
//! 4. [`encode`] — base64-wrap each page PNG for the multimodal request body
//! 5. [`cache`]  — read/write one raw-response file per batch
//! 6. [`llm`]    — drive the inference call with retry/backoff and parse the
//!    response; the only stage with network I/O
//! 7. [`normalize`] — strip code fences from the raw response before parsing

pub mod cache;
pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod plan;
pub mod render;

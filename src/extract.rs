//! Top-level extraction entry points and the pipeline coordinator.
//!
//! The coordinator walks the stages in order — render, plan, dispatch,
//! collect — and owns the single synchronisation point of the whole
//! pipeline: the result collection that waits for every batch worker and
//! restores batch-index order before returning. Workers never talk to each
//! other; the only shared resource is the on-disk response cache, which is
//! partitioned by batch index.
//!
//! Backpressure is structural: `buffer_unordered(concurrency)` caps the
//! number of in-flight inference calls no matter how large the document is.

use crate::config::ExtractionConfig;
use crate::error::InvoxError;
use crate::output::{BatchRecord, ExtractionOutput, ExtractionStats};
use crate::pipeline::cache::ResponseCache;
use crate::pipeline::llm::{self, InferenceService, ProviderService};
use crate::pipeline::plan;
use crate::pipeline::render::{self, Page};
use crate::pipeline::input;
use crate::progress::FileLog;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when the caller names a provider but no model.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Extract structured invoice records from a document.
///
/// This is the primary entry point for the library: the caller supplies the
/// document bytes and the filename they arrived with (only its extension is
/// consulted, to pick PDF vs. raster-image handling).
///
/// # Returns
/// `Ok(ExtractionOutput)` even when some batches failed — failed batches
/// appear as `None` entries at their index in `output.records`.
///
/// # Errors
/// Returns `Err(InvoxError)` only for fatal conditions: the document cannot
/// be opened at all, no provider is configured, or the cache directory or
/// log file cannot be created.
pub async fn extract(
    bytes: Vec<u8>,
    filename: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoxError> {
    let total_start = Instant::now();
    info!("starting extraction: {filename}");

    let render_start = Instant::now();
    let rendered = render::render_document(bytes, filename, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "rendered {} pages in {}ms ({} via OCR fallback)",
        rendered.pages.len(),
        render_duration_ms,
        rendered.ocr_pages
    );

    run_pipeline(
        rendered.pages,
        rendered.ocr_pages,
        render_duration_ms,
        total_start,
        config,
    )
    .await
}

/// Extract from pages the caller already rendered.
///
/// Useful when page text and images come from another source (or from a
/// previous [`extract`] run's renderer); batching, caching, dispatch, and
/// reordering behave exactly as in [`extract`].
pub async fn extract_pages(
    pages: Vec<Page>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoxError> {
    run_pipeline(pages, 0, 0, Instant::now(), config).await
}

/// Resolve a local path or HTTP/HTTPS URL, then [`extract`].
pub async fn extract_path(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoxError> {
    let source = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    extract(source.bytes, &source.filename, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    bytes: Vec<u8>,
    filename: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoxError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoxError::Internal(format!("failed to create tokio runtime: {e}")))?
        .block_on(extract(bytes, filename, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Plan, dispatch, collect, reorder.
async fn run_pipeline(
    pages: Vec<Page>,
    ocr_pages: usize,
    render_duration_ms: u64,
    total_start: Instant,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoxError> {
    let service = resolve_service(config)?;
    let log = FileLog::from_path(config.log_path.as_deref())?;
    let cache = ResponseCache::open(&config.cache_dir)?;

    let total_pages = pages.len();
    let batches = plan::plan(pages, config.batch_budget);
    let total_batches = batches.len();
    debug!(
        "planned {total_batches} batches over {total_pages} pages (budget {} chars)",
        config.batch_budget
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total_batches);
    }

    let llm_start = Instant::now();
    let mut results: Vec<BatchRecord> = stream::iter(batches.into_iter().map(|batch| {
        let service = Arc::clone(&service);
        let cache = cache.clone();
        let config = config.clone();
        let log = log.clone();
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_batch_start(batch.index, total_batches);
            }

            let record = llm::process_batch(&service, &cache, batch, &config).await;

            if record.error.is_none() {
                log.append(&format!(
                    "batch {} extracted in {:.2}s",
                    record.batch_index,
                    record.duration_ms as f64 / 1000.0
                ));
            }
            if let Some(ref cb) = config.progress_callback {
                match &record.error {
                    None => cb.on_batch_complete(record.batch_index, total_batches, record.from_cache),
                    Some(e) => cb.on_batch_failed(record.batch_index, total_batches, &e.to_string()),
                }
            }
            record
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    // Workers complete in arbitrary order; the caller is promised
    // batch-index order.
    results.sort_by_key(|r| r.batch_index);

    let extracted = results.iter().filter(|r| r.data.is_some()).count();
    let failed = results.len() - extracted;
    let cached = results.iter().filter(|r| r.from_cache).count();

    let stats = ExtractionStats {
        total_pages,
        ocr_pages,
        total_batches,
        extracted_batches: extracted,
        failed_batches: failed,
        cached_batches: cached,
        render_duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    log.append(&format!(
        "total extraction time: {:.2}s",
        stats.total_duration_ms as f64 / 1000.0
    ));
    info!(
        "extraction complete: {}/{} batches ({} cached), {}ms total",
        extracted, total_batches, cached, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total_batches, extracted);
    }

    Ok(ExtractionOutput {
        records: results.iter().map(|r| r.data.clone()).collect(),
        batches: results,
        stats,
    })
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InvoxError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the inference service, from most-specific to least-specific.
///
/// The four-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built service** (`config.service`) — the caller constructed the
///    service entirely; we use it as-is. This is also the seam tests use to
///    script responses.
///
/// 2. **Named provider + model** (`config.provider_name`) — reads the
///    corresponding API key (`OPENAI_API_KEY`, etc.) from the environment.
///
/// 3. **Environment pair** (`INVOX_LLM_PROVIDER` + `INVOX_MODEL`) — a
///    provider and model chosen at the execution-environment level
///    (Makefile, shell script, CI). Checked before full auto-detection so
///    the model choice is honoured even when multiple API keys are present.
///
/// 4. **Full auto-detection** (`ProviderFactory::from_env`) — the factory
///    scans all known API key variables and picks the first available
///    provider.
fn resolve_service(config: &ExtractionConfig) -> Result<Arc<dyn InferenceService>, InvoxError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let provider = create_vision_provider(name, model)?;
        return Ok(Arc::new(ProviderService::new(provider)));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("INVOX_LLM_PROVIDER"),
        std::env::var("INVOX_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = create_vision_provider(&prov, &model)?;
            return Ok(Arc::new(ProviderService::new(provider)));
        }
    }

    // Prefer OpenAI explicitly when an OpenAI API key is present, so users
    // with multiple provider keys get a predictable default.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            let provider = create_vision_provider("openai", model)?;
            return Ok(Arc::new(ProviderService::new(provider)));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoxError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(ProviderService::new(llm_provider)))
}

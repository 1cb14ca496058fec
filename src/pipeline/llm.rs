//! The extraction worker: one batch in, one [`BatchRecord`] out.
//!
//! This module owns the full request lifecycle for a batch — cache lookup,
//! request construction, the remote call, retry policy, response
//! normalisation, and the strict JSON parse. Prompt content lives in
//! [`crate::prompts`] so it can change without touching retry or
//! error-handling logic here.
//!
//! ## Retry Strategy
//!
//! Exactly two conditions are worth a retry, and both are bounded by a
//! shared attempts budget (`1 + max_retries`) so a misbehaving provider can
//! never loop the worker forever:
//!
//! * **Throttling** (HTTP 429 / rate-limit): sleep a fixed backoff, call
//!   again with the same request.
//! * **Blank content** (empty or fence-only): skip caching, sleep a short
//!   delay, call again — these are transient model hiccups, not errors.
//!
//! Any other provider failure, and any response that survives
//! normalisation but still isn't a JSON object, ends the batch as
//! `data = None`. Nothing here ever propagates an error to the coordinator.

use crate::config::ExtractionConfig;
use crate::error::{BatchError, ServiceError};
use crate::output::BatchRecord;
use crate::pipeline::cache::{batch_fingerprint, ResponseCache};
use crate::pipeline::encode;
use crate::pipeline::normalize::{is_blank_response, strip_response_fences};
use crate::pipeline::plan::Batch;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, PAGE_SEPARATOR};
use crate::schema::InvoiceRecord;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// One fully-assembled inference request: the system instruction, the
/// concatenated page texts, and the page images in document order.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Which batch this request serves (for logging only).
    pub batch_index: usize,
    /// System instruction enumerating the target schema.
    pub system: String,
    /// Page texts joined with the page separator.
    pub text: String,
    /// One base64 PNG per page, in page order.
    pub images: Vec<ImageData>,
    /// Sampling temperature (0.0 for deterministic-leaning extraction).
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: usize,
}

/// The remote document-understanding capability: text + images in,
/// free-form text (expected to contain one JSON object) out.
///
/// The pipeline only ever talks to the service through this trait, which is
/// what lets tests script responses and lets callers wrap a provider with
/// their own middleware.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn generate(&self, request: &InferenceRequest) -> Result<String, ServiceError>;
}

/// Production [`InferenceService`] backed by an `edgequake_llm` provider.
pub struct ProviderService {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderService {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl InferenceService for ProviderService {
    async fn generate(&self, request: &InferenceRequest) -> Result<String, ServiceError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(request.text.as_str(), request.images.clone()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "batch {}: {} input tokens, {} output tokens",
                    request.batch_index, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => {
                let detail = format!("{e}");
                if is_throttle_signal(&detail) {
                    Err(ServiceError::Throttled { detail })
                } else {
                    Err(ServiceError::Failed { detail })
                }
            }
        }
    }
}

/// Providers surface rate limiting as text, not as a typed error; match the
/// markers the major APIs actually emit.
fn is_throttle_signal(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("429")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
}

/// Process one batch to completion.
///
/// Always returns a `BatchRecord` — a failed batch carries `data = None`
/// and an explanatory error so sibling batches and the run continue.
pub(crate) async fn process_batch(
    service: &Arc<dyn InferenceService>,
    cache: &ResponseCache,
    batch: Batch,
    config: &ExtractionConfig,
) -> BatchRecord {
    let start = Instant::now();
    let batch_index = batch.index;
    let page_indices = batch.page_indices();
    let fingerprint = batch_fingerprint(&page_indices, config.batch_budget);

    // Cache first: a previous run (or this one, resumed) already paid for
    // this batch.
    if !config.force_refresh {
        if let Some(raw) = cache.read(batch_index, fingerprint) {
            return parse_into_record(batch_index, page_indices, &raw, start, 0, true);
        }
    }

    let text: String = batch
        .pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR);
    let images: Vec<ImageData> = batch.pages.iter().map(|p| encode::encode_page(&p.png)).collect();

    let request = InferenceRequest {
        batch_index,
        system: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        text,
        images,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let max_attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let retries = (attempt - 1).min(u8::MAX as u32) as u8;

        match service.generate(&request).await {
            Ok(raw) if is_blank_response(&raw) => {
                if attempt < max_attempts {
                    warn!(
                        "batch {batch_index}: empty or fence-only response, retrying in {}ms",
                        config.empty_retry_delay_ms
                    );
                    sleep(Duration::from_millis(config.empty_retry_delay_ms)).await;
                    continue;
                }
                warn!("batch {batch_index}: still empty after {attempt} attempts");
                return BatchRecord {
                    batch_index,
                    pages: page_indices,
                    data: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries,
                    from_cache: false,
                    error: Some(BatchError::EmptyResponse {
                        batch: batch_index,
                        retries,
                    }),
                };
            }
            Ok(raw) => {
                cache.write(batch_index, fingerprint, &raw);
                return parse_into_record(batch_index, page_indices, &raw, start, retries, false);
            }
            Err(ServiceError::Throttled { detail }) => {
                if attempt < max_attempts {
                    warn!(
                        "batch {batch_index}: throttled ({detail}), backing off {}ms",
                        config.throttle_backoff_ms
                    );
                    sleep(Duration::from_millis(config.throttle_backoff_ms)).await;
                    continue;
                }
                warn!("batch {batch_index}: still throttled after {attempt} attempts");
                return BatchRecord {
                    batch_index,
                    pages: page_indices,
                    data: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries,
                    from_cache: false,
                    error: Some(BatchError::LlmFailed {
                        batch: batch_index,
                        retries,
                        detail,
                    }),
                };
            }
            Err(ServiceError::Failed { detail }) => {
                warn!("batch {batch_index}: inference call failed: {detail}");
                return BatchRecord {
                    batch_index,
                    pages: page_indices,
                    data: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries,
                    from_cache: false,
                    error: Some(BatchError::LlmFailed {
                        batch: batch_index,
                        retries,
                        detail,
                    }),
                };
            }
        }
    }
}

/// Normalise and strictly parse a raw response into the batch's record.
///
/// A parse failure logs the raw content alongside the error — the cache
/// still holds the response, so the failure can be diagnosed offline —
/// and surfaces as `data = None`.
fn parse_into_record(
    batch_index: usize,
    pages: Vec<usize>,
    raw: &str,
    start: Instant,
    retries: u8,
    from_cache: bool,
) -> BatchRecord {
    let normalized = strip_response_fences(raw);
    match serde_json::from_str::<InvoiceRecord>(&normalized) {
        Ok(record) => BatchRecord {
            batch_index,
            pages,
            data: Some(record),
            duration_ms: start.elapsed().as_millis() as u64,
            retries,
            from_cache,
            error: None,
        },
        Err(e) => {
            warn!("batch {batch_index}: JSON parse failed: {e}\nraw response content:\n{raw}");
            BatchRecord {
                batch_index,
                pages,
                data: None,
                duration_ms: start.elapsed().as_millis() as u64,
                retries,
                from_cache,
                error: Some(BatchError::MalformedResponse {
                    batch: batch_index,
                    detail: e.to_string(),
                }),
            }
        }
    }
}

//! Configuration types for invoice extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across workers, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! There is no hidden process-wide state: the provider handle, prompt text,
//! cache location, and budgets all live here and are passed in by the caller.

use crate::error::InvoxError;
use crate::pipeline::llm::InferenceService;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for an invoice-extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use invox::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .batch_budget(6_000)
///     .concurrency(16)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum cumulative page-text length (characters) per batch. Default: 6 000.
    ///
    /// Pages accumulate into a batch until adding the next one would exceed
    /// this budget. A single page longer than the budget still forms its own
    /// batch; pages are never split.
    pub batch_budget: usize,

    /// Number of concurrent inference calls. Default: 16.
    ///
    /// The service is network-bound, not CPU-bound; the ceiling bounds the
    /// outbound request burst regardless of document size. Lower this if the
    /// provider rate-limits you (`429`), raise it if your quota allows.
    pub concurrency: usize,

    /// Ignore cached responses and call the service for every batch. Default: false.
    ///
    /// Cached raw responses normally short-circuit the remote call, making
    /// re-runs free. Set this when the prompt or model changed and stale
    /// responses must not be replayed.
    pub force_refresh: bool,

    /// Directory holding one raw-response file per batch. Default: `.invox-cache`.
    ///
    /// Entries survive process restarts; a second run over the same document
    /// reads them instead of calling the service again.
    pub cache_dir: PathBuf,

    /// Optional append-only plain-text log receiving per-batch and total
    /// timing lines. Default: None (no file logging).
    pub log_path: Option<PathBuf>,

    /// Longest-edge pixel cap for the OCR raster of a blank page. Default: 2 400.
    ///
    /// OCR accuracy needs more pixels than the vision payload does. This cap
    /// applies only to the raster fed to Tesseract when native text
    /// extraction comes back empty.
    pub ocr_render_pixels: u32,

    /// Longest-edge pixel cap for the PNG payload attached to the inference
    /// request. Default: 1 600.
    ///
    /// Kept separate from `ocr_render_pixels` so OCR fidelity and request
    /// size can be tuned independently.
    pub payload_render_pixels: u32,

    /// Tesseract language code(s), e.g. "eng" or "eng+deu". Default: "eng".
    pub ocr_language: String,

    /// LLM model identifier, e.g. "gpt-4o", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `service`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed inference service. Takes precedence over
    /// `provider_name`. Useful in tests or when the caller needs custom
    /// middleware around the provider.
    pub service: Option<Arc<dyn InferenceService>>,

    /// Sampling temperature for the completion. Default: 0.0.
    ///
    /// Zero keeps the extraction deterministic-leaning: the same invoice
    /// should parse to the same record.
    pub temperature: f32,

    /// Maximum tokens the service may generate per batch. Default: 1 500.
    pub max_tokens: usize,

    /// Retry budget per batch beyond the first attempt. Default: 2.
    ///
    /// Shared between the single empty-response retry and the throttle
    /// retry; the worker never loops unbounded on a misbehaving provider.
    pub max_retries: u32,

    /// Fixed backoff before retrying a throttled call, in milliseconds.
    /// Default: 10 000.
    pub throttle_backoff_ms: u64,

    /// Delay before retrying an empty or fence-only response, in
    /// milliseconds. Default: 2 000.
    pub empty_retry_delay_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system instruction. If None, uses the built-in invoice prompt.
    pub system_prompt: Option<String>,

    /// Progress callback fired per batch. Default: None.
    pub progress_callback: Option<ProgressCallback>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_budget: 6_000,
            concurrency: 16,
            force_refresh: false,
            cache_dir: PathBuf::from(".invox-cache"),
            log_path: None,
            ocr_render_pixels: 2_400,
            payload_render_pixels: 1_600,
            ocr_language: "eng".to_string(),
            model: None,
            provider_name: None,
            service: None,
            temperature: 0.0,
            max_tokens: 1_500,
            max_retries: 2,
            throttle_backoff_ms: 10_000,
            empty_retry_delay_ms: 2_000,
            password: None,
            system_prompt: None,
            progress_callback: None,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("batch_budget", &self.batch_budget)
            .field("concurrency", &self.concurrency)
            .field("force_refresh", &self.force_refresh)
            .field("cache_dir", &self.cache_dir)
            .field("log_path", &self.log_path)
            .field("ocr_render_pixels", &self.ocr_render_pixels)
            .field("payload_render_pixels", &self.payload_render_pixels)
            .field("ocr_language", &self.ocr_language)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("service", &self.service.as_ref().map(|_| "<dyn InferenceService>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("throttle_backoff_ms", &self.throttle_backoff_ms)
            .field("empty_retry_delay_ms", &self.empty_retry_delay_ms)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn batch_budget(mut self, chars: usize) -> Self {
        self.config.batch_budget = chars.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn force_refresh(mut self, v: bool) -> Self {
        self.config.force_refresh = v;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    pub fn ocr_render_pixels(mut self, px: u32) -> Self {
        self.config.ocr_render_pixels = px.max(100);
        self
    }

    pub fn payload_render_pixels(mut self, px: u32) -> Self {
        self.config.payload_render_pixels = px.max(100);
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn service(mut self, service: Arc<dyn InferenceService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn throttle_backoff_ms(mut self, ms: u64) -> Self {
        self.config.throttle_backoff_ms = ms;
        self
    }

    pub fn empty_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.empty_retry_delay_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoxError> {
        let c = &self.config;
        if c.batch_budget == 0 {
            return Err(InvoxError::InvalidConfig(
                "batch budget must be ≥ 1 character".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(InvoxError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(InvoxError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

//! CLI binary for invox.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints the ordered record array as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use invox::{extract_path, ExtractionConfig, ExtractionProgress, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus a log line per batch.
/// Batches complete out of order under concurrency, so all state is atomic.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Rendering");
        bar.set_message("opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgress for CliProgress {
    fn on_run_start(&self, total_batches: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} batches  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_batches as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
    }

    fn on_batch_start(&self, batch_index: usize, _total: usize) {
        self.bar.set_message(format!("batch {batch_index}"));
    }

    fn on_batch_complete(&self, batch_index: usize, total: usize, from_cache: bool) {
        let source = if from_cache { dim("cache") } else { dim("api") };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            green("✓"),
            batch_index + 1,
            total,
            source,
        ));
        self.bar.inc(1);
    }

    fn on_batch_failed(&self, batch_index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}",
            red("✗"),
            batch_index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_batches: usize, extracted: usize) {
        let failed = total_batches.saturating_sub(extracted);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} batches extracted successfully",
                green("✔"),
                bold(&extracted.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} batches extracted  ({} failed)",
                if extracted == 0 { red("✘") } else { cyan("⚠") },
                bold(&extracted.to_string()),
                total_batches,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to stdout as a JSON array (one object per batch)
  invox invoice.pdf

  # Write to a file, with a timing log
  invox invoice.pdf -o extracted.json --log processing.log

  # Re-run, ignoring cached responses
  invox invoice.pdf --force

  # Scanned single-page receipt
  invox receipt.png

  # Extract from a URL with a specific model
  invox --model gpt-4o --provider openai https://billing.example.com/inv-42.pdf

CACHING:
  Raw provider responses are stored one file per batch under --cache-dir
  (default .invox-cache). A second run over the same document replays them
  and issues zero API calls; --force bypasses the cache.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        OpenAI API key
  ANTHROPIC_API_KEY     Anthropic API key
  GEMINI_API_KEY        Google Gemini API key
  INVOX_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  INVOX_MODEL           Override model ID
  TESSDATA_PREFIX       Tesseract language-data directory (OCR fallback)
  PDFIUM_LIB_PATH       Path to an existing libpdfium
"#;

/// Extract structured billing data from invoice PDFs and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invox",
    version,
    about = "Extract structured billing data from invoice PDFs and images using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local document path (PDF or image) or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON record array to this file instead of stdout.
    #[arg(short, long, env = "INVOX_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "INVOX_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "INVOX_PROVIDER")]
    provider: Option<String>,

    /// Maximum cumulative page-text characters per batch.
    #[arg(long, env = "INVOX_BUDGET", default_value_t = 6_000)]
    budget: usize,

    /// Number of concurrent inference calls.
    #[arg(short, long, env = "INVOX_CONCURRENCY", default_value_t = 16)]
    concurrency: usize,

    /// Ignore cached responses and call the provider for every batch.
    #[arg(long)]
    force: bool,

    /// Directory for cached raw responses.
    #[arg(long, env = "INVOX_CACHE_DIR", default_value = ".invox-cache")]
    cache_dir: PathBuf,

    /// Append per-batch and total timing lines to this file.
    #[arg(long, env = "INVOX_LOG")]
    log: Option<PathBuf>,

    /// Tesseract language code(s) for the OCR fallback.
    #[arg(long, env = "INVOX_OCR_LANGUAGE", default_value = "eng")]
    language: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOX_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per batch.
    #[arg(long, env = "INVOX_MAX_TOKENS", default_value_t = 1_500)]
    max_tokens: usize,

    /// Retries per batch beyond the first attempt.
    #[arg(long, env = "INVOX_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "INVOX_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Include per-batch details and stats in the JSON output, not just records.
    #[arg(long)]
    full: bool,

    /// Disable the progress bar.
    #[arg(long, env = "INVOX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, env = "INVOX_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn ExtractionProgress>)
    } else {
        None
    };

    let config = build_config(&cli, progress).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_path(&cli.input, &config)
        .await
        .context("Extraction failed")?;

    let json = if cli.full {
        serde_json::to_string_pretty(&output).context("Failed to serialise output")?
    } else {
        serde_json::to_string_pretty(&output.records).context("Failed to serialise records")?
    };

    match cli.output {
        Some(ref path) => {
            // Atomic write: temp file in the same directory, then rename.
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let tmp_path = path.with_extension("json.tmp");
            tokio::fs::write(&tmp_path, &json)
                .await
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            tokio::fs::rename(&tmp_path, path)
                .await
                .with_context(|| format!("Failed to rename into {}", path.display()))?;

            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} batches  {}ms  →  {}",
                    if output.stats.failed_batches == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    output.stats.extracted_batches,
                    output.stats.total_batches,
                    output.stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .context("Failed to write to stdout")?;
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        eprintln!(
            "   {} pages ({} OCR)  /  {} batches ({} cached)  —  {}ms total",
            dim(&output.stats.total_pages.to_string()),
            dim(&output.stats.ocr_pages.to_string()),
            dim(&output.stats.total_batches.to_string()),
            dim(&output.stats.cached_batches.to_string()),
            output.stats.total_duration_ms,
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .batch_budget(cli.budget)
        .concurrency(cli.concurrency)
        .force_refresh(cli.force)
        .cache_dir(cli.cache_dir.clone())
        .ocr_language(cli.language.clone())
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref log) = cli.log {
        builder = builder.log_path(log.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields without dedicated builder paths in this shim.
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.password = cli.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}

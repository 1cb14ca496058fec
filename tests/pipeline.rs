//! Pipeline integration tests.
//!
//! These drive the coordinator and worker through a scripted
//! [`InferenceService`], so they exercise batching, concurrency, ordering,
//! caching, and retry behaviour without touching pdfium, Tesseract, or a
//! real provider. Pages are constructed directly and fed through
//! [`extract_pages`].

use async_trait::async_trait;
use invox::{
    extract_pages, BatchError, ExtractionConfig, InferenceRequest, InferenceService, Page,
    ServiceError,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Scripted inference service: a queue of responses per batch index, an
/// optional artificial latency per batch, and a global call counter.
///
/// The last response in a queue is sticky, so repeated calls (force-refresh
/// runs) keep receiving it.
struct ScriptedService {
    scripts: Mutex<HashMap<usize, Vec<Result<String, ServiceError>>>>,
    delays_ms: HashMap<usize, u64>,
    calls: AtomicUsize,
}

impl ScriptedService {
    fn new(scripts: Vec<(usize, Vec<Result<String, ServiceError>>)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            delays_ms: HashMap::new(),
            calls: AtomicUsize::new(0),
        })
    }

    fn with_delays(
        scripts: Vec<(usize, Vec<Result<String, ServiceError>>)>,
        delays_ms: Vec<(usize, u64)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            delays_ms: delays_ms.into_iter().collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceService for ScriptedService {
    async fn generate(&self, request: &InferenceRequest) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays_ms.get(&request.batch_index) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(&request.batch_index)
            .unwrap_or_else(|| panic!("no script for batch {}", request.batch_index));
        assert!(!queue.is_empty(), "script exhausted for batch {}", request.batch_index);
        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        }
    }
}

/// Records the last request it saw, then answers with a fixed object.
struct CapturingService {
    seen: Mutex<Option<InferenceRequest>>,
}

#[async_trait]
impl InferenceService for CapturingService {
    async fn generate(&self, request: &InferenceRequest) -> Result<String, ServiceError> {
        *self.seen.lock().unwrap() = Some(request.clone());
        Ok(r#"{"total": 1}"#.to_string())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn page(index: usize, text_len: usize) -> Page {
    Page {
        index,
        text: "x".repeat(text_len),
        png: vec![0x89, b'P', b'N', b'G', index as u8],
    }
}

fn batch_json(i: usize) -> String {
    format!(r#"{{"batch": {i}, "invoice_number": "INV-{i}"}}"#)
}

fn test_config(service: Arc<dyn InferenceService>, cache_dir: &Path) -> ExtractionConfig {
    ExtractionConfig::builder()
        .service(service)
        .cache_dir(cache_dir)
        .batch_budget(2_000)
        .concurrency(8)
        .throttle_backoff_ms(5)
        .empty_retry_delay_ms(5)
        .build()
        .unwrap()
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_keep_batch_order_regardless_of_completion_order() {
    let dir = tempfile::tempdir().unwrap();
    // 8 pages of 1,000 chars under a 2,000 budget → 4 batches of 2 pages.
    let pages: Vec<Page> = (0..8).map(|i| page(i, 1_000)).collect();

    // Earlier batches answer slower, so completion order is reversed.
    let service = ScriptedService::with_delays(
        (0..4).map(|i| (i, vec![Ok(batch_json(i))])).collect(),
        vec![(0, 80), (1, 40), (2, 20), (3, 0)],
    );
    let config = test_config(service.clone(), dir.path());

    let output = extract_pages(pages, &config).await.unwrap();

    assert_eq!(output.records.len(), 4);
    for (i, record) in output.records.iter().enumerate() {
        let record = record.as_ref().expect("all batches succeed");
        assert_eq!(record.get_amount("batch"), Some(i as f64));
    }
    for (i, batch) in output.batches.iter().enumerate() {
        assert_eq!(batch.batch_index, i);
        assert_eq!(batch.pages, vec![2 * i, 2 * i + 1]);
    }
    assert_eq!(service.calls(), 4);
}

// ── Graceful degradation ─────────────────────────────────────────────────────

#[tokio::test]
async fn unparsable_batch_yields_null_without_hurting_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let pages: Vec<Page> = (0..6).map(|i| page(i, 1_000)).collect();

    let service = ScriptedService::new(vec![
        (0, vec![Ok(batch_json(0))]),
        (1, vec![Ok("I'm sorry, I can't parse this invoice.".to_string())]),
        (2, vec![Ok(batch_json(2))]),
    ]);
    let config = test_config(service, dir.path());

    let output = extract_pages(pages, &config).await.unwrap();

    assert_eq!(output.records.len(), 3);
    assert!(output.records[0].is_some());
    assert!(output.records[1].is_none());
    assert!(output.records[2].is_some());
    assert!(matches!(
        output.batches[1].error,
        Some(BatchError::MalformedResponse { batch: 1, .. })
    ));
    assert_eq!(output.stats.extracted_batches, 2);
    assert_eq!(output.stats.failed_batches, 1);
}

#[tokio::test]
async fn provider_failure_is_not_retried_and_yields_null() {
    let dir = tempfile::tempdir().unwrap();
    let pages = vec![page(0, 500)];

    let service = ScriptedService::new(vec![(
        0,
        vec![Err(ServiceError::Failed {
            detail: "invalid api key".into(),
        })],
    )]);
    let config = test_config(service.clone(), dir.path());

    let output = extract_pages(pages, &config).await.unwrap();

    assert!(output.records[0].is_none());
    assert!(matches!(
        output.batches[0].error,
        Some(BatchError::LlmFailed { batch: 0, .. })
    ));
    // Non-throttle failures burn exactly one attempt.
    assert_eq!(service.calls(), 1);
}

// ── Caching ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_replays_cache_with_zero_calls() {
    let dir = tempfile::tempdir().unwrap();
    let make_pages = || (0..4).map(|i| page(i, 1_000)).collect::<Vec<_>>();

    let first = ScriptedService::new((0..2).map(|i| (i, vec![Ok(batch_json(i))])).collect());
    let config = test_config(first.clone(), dir.path());
    let output1 = extract_pages(make_pages(), &config).await.unwrap();
    assert_eq!(first.calls(), 2);

    // Fresh service with no scripts: any call would panic.
    let second = ScriptedService::new(vec![]);
    let config = test_config(second.clone(), dir.path());
    let output2 = extract_pages(make_pages(), &config).await.unwrap();

    assert_eq!(second.calls(), 0);
    assert_eq!(output2.stats.cached_batches, 2);
    assert!(output2.batches.iter().all(|b| b.from_cache));
    assert_eq!(
        serde_json::to_value(&output1.records).unwrap(),
        serde_json::to_value(&output2.records).unwrap(),
    );
}

#[tokio::test]
async fn force_refresh_ignores_existing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let make_pages = || vec![page(0, 500)];

    let first = ScriptedService::new(vec![(0, vec![Ok(r#"{"total": 1}"#.to_string())])]);
    let config = test_config(first, dir.path());
    extract_pages(make_pages(), &config).await.unwrap();

    let second = ScriptedService::new(vec![(0, vec![Ok(r#"{"total": 2}"#.to_string())])]);
    let config = ExtractionConfig::builder()
        .service(second.clone())
        .cache_dir(dir.path())
        .batch_budget(2_000)
        .force_refresh(true)
        .build()
        .unwrap();
    let output = extract_pages(make_pages(), &config).await.unwrap();

    assert_eq!(second.calls(), 1);
    let record = output.records[0].as_ref().unwrap();
    assert_eq!(record.get_amount("total"), Some(2.0));
}

#[tokio::test]
async fn budget_change_invalidates_cache_entries() {
    let dir = tempfile::tempdir().unwrap();

    let first = ScriptedService::new(vec![(0, vec![Ok(batch_json(0))])]);
    let config = test_config(first, dir.path());
    extract_pages(vec![page(0, 500)], &config).await.unwrap();

    // Same batch index, different budget → the cached entry must not replay.
    let second = ScriptedService::new(vec![(0, vec![Ok(batch_json(0))])]);
    let config = ExtractionConfig::builder()
        .service(second.clone())
        .cache_dir(dir.path())
        .batch_budget(999)
        .build()
        .unwrap();
    extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(second.calls(), 1);
}

// ── Retry behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_response_retried_and_retried_content_wins() {
    let dir = tempfile::tempdir().unwrap();

    let service = ScriptedService::new(vec![(
        0,
        vec![Ok(String::new()), Ok(r#"{"total": 7}"#.to_string())],
    )]);
    let config = test_config(service.clone(), dir.path());

    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(service.calls(), 2);
    let record = output.records[0].as_ref().expect("retried content parsed");
    assert_eq!(record.get_amount("total"), Some(7.0));
    assert_eq!(output.batches[0].retries, 1);
}

#[tokio::test]
async fn fence_only_response_counts_as_empty() {
    let dir = tempfile::tempdir().unwrap();

    let service = ScriptedService::new(vec![(
        0,
        vec![
            Ok("```json```".to_string()),
            Ok("```json\n{\"total\": 3}\n```".to_string()),
        ],
    )]);
    let config = test_config(service.clone(), dir.path());

    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(service.calls(), 2);
    let record = output.records[0].as_ref().unwrap();
    assert_eq!(record.get_amount("total"), Some(3.0));
}

#[tokio::test]
async fn blank_responses_are_never_cached() {
    let dir = tempfile::tempdir().unwrap();

    // Both attempts blank: batch fails and nothing must be persisted.
    let first = ScriptedService::new(vec![(0, vec![Ok(String::new())])]);
    let config = ExtractionConfig::builder()
        .service(first.clone())
        .cache_dir(dir.path())
        .batch_budget(2_000)
        .max_retries(1)
        .empty_retry_delay_ms(5)
        .build()
        .unwrap();
    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(first.calls(), 2);
    assert!(matches!(
        output.batches[0].error,
        Some(BatchError::EmptyResponse { batch: 0, .. })
    ));

    // A later run must go to the service, not to a cached blank.
    let second = ScriptedService::new(vec![(0, vec![Ok(r#"{"total": 4}"#.to_string())])]);
    let config = test_config(second.clone(), dir.path());
    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(second.calls(), 1);
    assert!(output.records[0].is_some());
}

#[tokio::test]
async fn throttled_call_backs_off_and_retries_once() {
    let dir = tempfile::tempdir().unwrap();

    let service = ScriptedService::new(vec![(
        0,
        vec![
            Err(ServiceError::Throttled {
                detail: "429".into(),
            }),
            Ok(r#"{"total": 11}"#.to_string()),
        ],
    )]);
    let config = test_config(service.clone(), dir.path());

    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(service.calls(), 2);
    let record = output.records[0].as_ref().unwrap();
    assert_eq!(record.get_amount("total"), Some(11.0));
}

#[tokio::test]
async fn persistent_throttling_exhausts_the_attempt_budget() {
    let dir = tempfile::tempdir().unwrap();

    let service = ScriptedService::new(vec![(
        0,
        vec![Err(ServiceError::Throttled {
            detail: "rate_limit_exceeded".into(),
        })],
    )]);
    let config = ExtractionConfig::builder()
        .service(service.clone())
        .cache_dir(dir.path())
        .batch_budget(2_000)
        .max_retries(1)
        .throttle_backoff_ms(5)
        .build()
        .unwrap();

    let output = extract_pages(vec![page(0, 500)], &config).await.unwrap();

    assert_eq!(service.calls(), 2);
    assert!(output.records[0].is_none());
    assert!(matches!(
        output.batches[0].error,
        Some(BatchError::LlmFailed {
            batch: 0,
            retries: 1,
            ..
        })
    ));
}

// ── Request construction ─────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_joined_text_and_ordered_images() {
    let dir = tempfile::tempdir().unwrap();

    let service = Arc::new(CapturingService {
        seen: Mutex::new(None),
    });
    let config = test_config(service.clone(), dir.path());

    let pages = vec![
        Page {
            index: 0,
            text: "alpha".into(),
            png: vec![1],
        },
        Page {
            index: 1,
            text: "beta".into(),
            png: vec![2],
        },
    ];
    extract_pages(pages, &config).await.unwrap();

    let request = service.seen.lock().unwrap().clone().expect("one request");
    assert_eq!(request.batch_index, 0);
    assert_eq!(request.text, "alpha\n\nbeta");
    assert_eq!(request.images.len(), 2);
    assert_eq!(request.temperature, 0.0);
    assert_eq!(request.max_tokens, 1_500);
    assert!(request.system.contains("invoice_number"));
    assert!(request.system.contains("total_spent_by_provider"));
}

// ── Planner boundary through the pipeline ────────────────────────────────────

#[tokio::test]
async fn spec_budget_example_plans_two_batches() {
    let dir = tempfile::tempdir().unwrap();
    // Pages 1–2 total 4,000 chars, page 3 has 9,000, budget 6,000:
    // exactly [pages 1–2] and [page 3].
    let pages = vec![page(0, 1_500), page(1, 2_500), page(2, 9_000)];

    let service = ScriptedService::new((0..2).map(|i| (i, vec![Ok(batch_json(i))])).collect());
    let config = ExtractionConfig::builder()
        .service(service)
        .cache_dir(dir.path())
        .batch_budget(6_000)
        .build()
        .unwrap();

    let output = extract_pages(pages, &config).await.unwrap();

    assert_eq!(output.records.len(), 2);
    assert_eq!(output.batches[0].pages, vec![0, 1]);
    assert_eq!(output.batches[1].pages, vec![2]);
    assert_eq!(output.stats.total_batches, 2);
}

#[tokio::test]
async fn empty_document_yields_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let service = ScriptedService::new(vec![]);
    let config = test_config(service, dir.path());

    let output = extract_pages(Vec::new(), &config).await.unwrap();

    assert!(output.records.is_empty());
    assert_eq!(output.stats.total_batches, 0);
}

// ── Timing log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn timing_log_gets_batch_and_total_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("run.log");

    let service = ScriptedService::new(vec![(0, vec![Ok(batch_json(0))])]);
    let config = ExtractionConfig::builder()
        .service(service)
        .cache_dir(dir.path().join("cache"))
        .batch_budget(2_000)
        .log_path(&log_path)
        .build()
        .unwrap();

    extract_pages(vec![page(0, 500)], &config).await.unwrap();

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("batch 0 extracted in"));
    assert!(contents.contains("total extraction time:"));
}

//! Integration tests for the extraction pipeline.
//!
//! OCR and the text model are replaced by scripted stubs that count their
//! invocations, so these run offline and without tesseract installed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use edgequake_billscan::{
    AmountEntry, AmountKind, ExtractionConfig, ExtractionError, ExtractionProgressCallback,
    ExtractionStatus, Extractor, Fingerprint, FsResultStore, MemoryResultStore, ModelCallError,
    RecognitionError, ResultStore, StoreError, StructuredResult, TextModel, TextRecognizer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows the pipeline.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const RECEIPT_TEXT: &str = "Total: $100 Paid: $60 Due: $40";

const RECEIPT_REPLY: &str = r#"{
  "currency": "USD",
  "amounts": [
    {"kind": "total_bill", "value": 100, "source": "Total: $100"},
    {"kind": "paid", "value": 60, "source": "Paid: $60"},
    {"kind": "due", "value": 40, "source": "Due: $40"}
  ],
  "status": "ok"
}"#;

fn expected_receipt() -> StructuredResult {
    let entry = |kind, value, source: &str| AmountEntry {
        kind,
        value,
        source: source.to_string(),
    };
    StructuredResult {
        currency: "USD".into(),
        amounts: vec![
            entry(AmountKind::TotalBill, 100.0, "Total: $100"),
            entry(AmountKind::Paid, 60.0, "Paid: $60"),
            entry(AmountKind::Due, 40.0, "Due: $40"),
        ],
        status: ExtractionStatus::Ok,
    }
}

struct StubRecognizer {
    reply: Result<String, RecognitionError>,
    calls: AtomicUsize,
}

impl StubRecognizer {
    fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(err: RecognitionError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(err),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRecognizer for StubRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Per-model scripted replies; records the order of attempted models and the
/// last prompt seen.
struct StubModel {
    replies: HashMap<String, Result<String, ModelCallError>>,
    attempts: Mutex<Vec<String>>,
    last_prompt: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StubModel {
    fn new(replies: Vec<(&str, Result<&str, u16>)>) -> Arc<Self> {
        let replies = replies
            .into_iter()
            .map(|(model, r)| {
                let r = r.map(str::to_string).map_err(|code| ModelCallError::Status {
                    code,
                    text: format!("scripted {code}"),
                });
                (model.to_string(), r)
            })
            .collect();
        Arc::new(Self {
            replies,
            attempts: Mutex::new(Vec::new()),
            last_prompt: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for StubModel {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ModelCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(model.to_string());
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        self.replies
            .get(model)
            .cloned()
            .unwrap_or(Err(ModelCallError::Status {
                code: 404,
                text: "unscripted model".into(),
            }))
    }
}

/// Store whose every operation fails.
#[derive(Default)]
struct BrokenStore {
    puts: AtomicUsize,
}

#[async_trait]
impl ResultStore for BrokenStore {
    async fn lookup(&self, _fp: &Fingerprint) -> Result<Option<StructuredResult>, StoreError> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn put(
        &self,
        _fp: &Fingerprint,
        _raw: &[u8],
        _result: &StructuredResult,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("disk on fire".into()))
    }
}

fn config(candidates: &[&str]) -> ExtractionConfig {
    ExtractionConfig::builder()
        .candidate_models(candidates.iter().copied())
        .build()
        .unwrap()
}

fn extractor(
    config: ExtractionConfig,
    store: Arc<dyn ResultStore>,
    recognizer: &Arc<StubRecognizer>,
    model: &Arc<StubModel>,
) -> Extractor {
    Extractor::new(config, store, recognizer.clone(), model.clone())
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_receipt_then_cache_hit() {
    init_tracing();
    let store = Arc::new(MemoryResultStore::new());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("gemini-test", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["gemini-test"]), store.clone(), &recognizer, &model);

    let first = ex.process(b"receipt-image").await.unwrap();
    assert_eq!(first, expected_receipt());
    assert_eq!(recognizer.calls(), 1);
    assert_eq!(model.calls(), 1);
    assert_eq!(store.put_count(), 1);
    assert_eq!(
        store.raw_bytes(&Fingerprint::of(b"receipt-image")),
        Some(b"receipt-image".to_vec())
    );

    let prompt = model.last_prompt().unwrap();
    assert!(prompt.contains(RECEIPT_TEXT));
    assert!(prompt.contains("USD"));
    assert!(prompt.contains("total_bill"));

    let second = ex.process(b"receipt-image").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(recognizer.calls(), 1, "cache hit must not re-run OCR");
    assert_eq!(model.calls(), 1, "cache hit must not call the model");
    assert_eq!(store.put_count(), 1, "cache hit must not write");
}

#[tokio::test]
async fn fs_store_survives_a_new_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);

    let first = extractor(
        config(&["m"]),
        Arc::new(FsResultStore::new(dir.path())),
        &recognizer,
        &model,
    )
    .process(b"same bytes")
    .await
    .unwrap();

    let again = extractor(
        config(&["m"]),
        Arc::new(FsResultStore::new(dir.path())),
        &recognizer,
        &model,
    )
    .process_detailed(b"same bytes")
    .await
    .unwrap();

    assert!(again.cache_hit);
    assert_eq!(again.result, first);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn distinct_images_are_extracted_separately() {
    let store = Arc::new(MemoryResultStore::new());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["m"]), store.clone(), &recognizer, &model);

    ex.process(b"image-a").await.unwrap();
    ex.process(b"image-b").await.unwrap();
    assert_eq!(model.calls(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn empty_input_is_rejected_before_any_work() {
    let store = Arc::new(MemoryResultStore::new());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["m"]), store.clone(), &recognizer, &model);

    let err = ex.process(b"").await.unwrap_err();
    assert!(matches!(err, ExtractionError::NoInput));
    assert_eq!(err.http_status(), 400);
    assert_eq!(recognizer.calls(), 0);
    assert_eq!(model.calls(), 0);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn unavailable_model_falls_back_to_next_candidate() {
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("a", Err(404)), ("b", Ok(RECEIPT_REPLY))]);
    let ex = extractor(
        config(&["a", "b", "c"]),
        Arc::new(MemoryResultStore::new()),
        &recognizer,
        &model,
    );

    let out = ex.process_detailed(b"img").await.unwrap();
    assert_eq!(out.model.as_deref(), Some("b"));
    assert_eq!(out.result, expected_receipt());
    assert_eq!(model.attempts(), vec!["a", "b"]);
}

#[tokio::test]
async fn override_model_is_tried_first() {
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("pinned", Ok(RECEIPT_REPLY)), ("a", Ok(RECEIPT_REPLY))]);
    let config = ExtractionConfig::builder()
        .candidate_models(["a", "pinned"])
        .model_override("pinned")
        .build()
        .unwrap();
    let ex = extractor(config, Arc::new(MemoryResultStore::new()), &recognizer, &model);

    ex.process(b"img").await.unwrap();
    assert_eq!(model.attempts(), vec!["pinned"]);
}

#[tokio::test]
async fn rate_limit_stops_without_trying_other_candidates() {
    let store = Arc::new(MemoryResultStore::new());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("a", Err(429)), ("b", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["a", "b"]), store.clone(), &recognizer, &model);

    let err = ex.process(b"img").await.unwrap_err();
    match &err {
        ExtractionError::FatalFailure {
            model: m,
            status_code,
            rate_limited,
            ..
        } => {
            assert_eq!(m, "a");
            assert_eq!(*status_code, Some(429));
            assert!(*rate_limited);
        }
        other => panic!("expected FatalFailure, got {other:?}"),
    }
    assert!(err.is_rate_limited());
    assert_eq!(err.http_status(), 429);
    assert!(err.hint().unwrap().contains("retry later"));
    assert_eq!(model.attempts(), vec!["a"]);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn server_error_is_fatal_without_fallback() {
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("a", Err(500)), ("b", Ok(RECEIPT_REPLY))]);
    let ex = extractor(
        config(&["a", "b"]),
        Arc::new(MemoryResultStore::new()),
        &recognizer,
        &model,
    );

    let err = ex.process(b"img").await.unwrap_err();
    assert!(matches!(
        err,
        ExtractionError::FatalFailure {
            status_code: Some(500),
            rate_limited: false,
            ..
        }
    ));
    assert_eq!(err.http_status(), 502);
    assert_eq!(model.attempts(), vec!["a"]);
}

#[tokio::test]
async fn exhausted_candidates_report_no_accessible_model() {
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("a", Err(404)), ("b", Err(404))]);
    let ex = extractor(
        config(&["a", "b"]),
        Arc::new(MemoryResultStore::new()),
        &recognizer,
        &model,
    );

    let err = ex.process(b"img").await.unwrap_err();
    match &err {
        ExtractionError::NoAccessibleModel { attempted, .. } => {
            assert_eq!(attempted, &vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected NoAccessibleModel, got {other:?}"),
    }
    assert_eq!(err.http_status(), 404);
    assert!(err.hint().unwrap().contains("override"));
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn malformed_reply_is_surfaced_and_not_stored() {
    let store = Arc::new(MemoryResultStore::new());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let bad = r#"{"currency":"USD","amounts":[{"kind":"tax","value":5,"source":"Tax 5"}],"status":"ok"}"#;
    let model = StubModel::new(vec![("m", Ok(bad))]);
    let ex = extractor(config(&["m"]), store.clone(), &recognizer, &model);

    let err = ex.process(b"img").await.unwrap_err();
    assert!(matches!(err, ExtractionError::MalformedExternalResponse { .. }));
    assert_eq!(err.http_status(), 500);
    assert_eq!(store.put_count(), 0);
    assert!(store.is_empty());

    // Not cached, so a second attempt calls the model again.
    ex.process(b"img").await.unwrap_err();
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn fenced_reply_without_due_is_accepted() {
    let recognizer = StubRecognizer::ok("Total 50 Paid 50");
    let reply = "```json\n{\"currency\":\"EUR\",\"amounts\":[\
        {\"kind\":\"total_bill\",\"value\":50,\"source\":\"Total 50\"},\
        {\"kind\":\"paid\",\"value\":50,\"source\":\"Paid 50\"}],\"status\":\"ok\"}\n```";
    let model = StubModel::new(vec![("m", Ok(reply))]);
    let ex = extractor(
        config(&["m"]),
        Arc::new(MemoryResultStore::new()),
        &recognizer,
        &model,
    );

    let result = ex.process(b"img").await.unwrap();
    assert_eq!(result.currency, "EUR");
    assert_eq!(result.amounts.len(), 2);
    assert!(result.amount(AmountKind::Due).is_none());
}

#[tokio::test]
async fn recognition_failure_is_surfaced_without_model_call() {
    let recognizer = StubRecognizer::failing(RecognitionError::NoText);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(
        config(&["m"]),
        Arc::new(MemoryResultStore::new()),
        &recognizer,
        &model,
    );

    let err = ex.process(b"img").await.unwrap_err();
    assert!(matches!(
        err,
        ExtractionError::RecognitionFailed {
            source: RecognitionError::NoText
        }
    ));
    assert_eq!(err.http_status(), 422);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn storage_failure_still_returns_result() {
    init_tracing();
    let store = Arc::new(BrokenStore::default());
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["m"]), store.clone(), &recognizer, &model);

    let result = ex.process(b"img").await.unwrap();
    assert_eq!(result, expected_receipt());
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_cache_entry_is_treated_as_miss() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = FsResultStore::new(dir.path());
    let fp = Fingerprint::of(b"img");
    let path = store.result_path(&fp);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"{ not json").unwrap();

    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["m"]), Arc::new(store.clone()), &recognizer, &model);

    let result = ex.process(b"img").await.unwrap();
    assert_eq!(result, expected_receipt());
    assert_eq!(model.calls(), 1);

    // The fresh result replaced the corrupt entry.
    assert_eq!(store.lookup(&fp).await.unwrap(), Some(expected_receipt()));
}

#[tokio::test]
async fn cache_entry_breaking_result_rules_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsResultStore::new(dir.path());
    let fp = Fingerprint::of(b"img");
    let path = store.result_path(&fp);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{"currency":"","amounts":[{"kind":"due","value":-5.0,"source":""},{"kind":"due","value":1.0,"source":"x"}],"status":"ok"}"#,
    )
    .unwrap();

    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config(&["m"]), Arc::new(store.clone()), &recognizer, &model);

    let out = ex.process_detailed(b"img").await.unwrap();
    assert!(!out.cache_hit);
    assert_eq!(out.result, expected_receipt());
    assert_eq!(model.calls(), 1);
    assert_eq!(store.lookup(&fp).await.unwrap(), Some(expected_receipt()));
}

#[tokio::test]
async fn progress_callback_sees_cache_hit() {
    #[derive(Default)]
    struct Counter {
        starts: AtomicUsize,
        hits: AtomicUsize,
        attempts: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ExtractionProgressCallback for Counter {
        fn on_extraction_start(&self, _fp: &Fingerprint) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_cache_hit(&self, _fp: &Fingerprint) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        fn on_candidate_attempt(&self, _model: &str, _attempt: usize, _total: usize) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_extraction_error(&self, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    let counter = Arc::new(Counter::default());
    let config = ExtractionConfig::builder()
        .candidate_models(["m"])
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let ex = extractor(config, Arc::new(MemoryResultStore::new()), &recognizer, &model);

    ex.process(b"img").await.unwrap();
    ex.process(b"img").await.unwrap();
    ex.process(b"").await.unwrap_err();

    assert_eq!(counter.starts.load(Ordering::SeqCst), 2);
    assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    assert_eq!(counter.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_results_keep_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    std::fs::write(&a, [png.as_slice(), b"a".as_slice()].concat()).unwrap();
    std::fs::write(&b, [png.as_slice(), b"b".as_slice()].concat()).unwrap();

    let recognizer = StubRecognizer::ok(RECEIPT_TEXT);
    let model = StubModel::new(vec![("m", Ok(RECEIPT_REPLY))]);
    let config = ExtractionConfig::builder()
        .candidate_models(["m"])
        .concurrency(2)
        .build()
        .unwrap();
    let ex = extractor(config, Arc::new(MemoryResultStore::new()), &recognizer, &model);

    let inputs = vec![
        a.to_string_lossy().to_string(),
        "/no/such/receipt.png".to_string(),
        b.to_string_lossy().to_string(),
    ];
    let results = ex.extract_inputs(&inputs).await;

    let order: Vec<&str> = results.iter().map(|(i, _)| i.as_str()).collect();
    assert_eq!(order, inputs.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(results[0].1.is_ok());
    assert!(matches!(
        results[1].1,
        Err(ExtractionError::FileNotFound { .. })
    ));
    assert!(results[2].1.is_ok());
    assert_eq!(model.calls(), 2);
}

#[test]
fn extractor_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Extractor>();
}

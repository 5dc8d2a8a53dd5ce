//! Extraction entry points.
//!
//! [`Extractor`] owns the three collaborators (store, recogniser, model) and
//! drives one upload through the pipeline:
//!
//! ```text
//! bytes ─▶ fingerprint ─▶ lookup ──hit──▶ result
//!                           │
//!                          miss
//!                           ▼
//!                       recognize ─▶ prompt ─▶ invoke ─▶ validate ─▶ put ─▶ result
//! ```
//!
//! The pipeline as a whole is never retried; the only retry is the candidate
//! walk inside [`CandidateInvoker`]. A store failure on either side is logged
//! and otherwise ignored: the store is an optimisation, not a dependency.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::fingerprint::Fingerprint;
use crate::output::{ExtractionOutput, StructuredResult};
use crate::pipeline::input;
use crate::pipeline::invoke::{CandidateInvoker, InvocationOutcome};
use crate::pipeline::model::{GeminiClient, TextModel};
use crate::pipeline::recognize::{TesseractRecognizer, TextRecognizer};
use crate::pipeline::validate::validate_response;
use crate::prompts::build_extraction_prompt;
use crate::store::{FsResultStore, ResultStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Bill-image extraction pipeline.
///
/// Cheap to share: wrap in an `Arc` or borrow it across tasks.
///
/// # Example
/// ```rust,no_run
/// use edgequake_billscan::{ExtractionConfig, Extractor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder()
///     .api_key(std::env::var("GEMINI_API_KEY")?)
///     .build()?;
/// let extractor = Extractor::from_config(config)?;
/// let bytes = std::fs::read("receipt.jpg")?;
/// let result = extractor.process(&bytes).await?;
/// println!("{}", serde_json::to_string_pretty(&result)?);
/// # Ok(())
/// # }
/// ```
pub struct Extractor {
    store: Arc<dyn ResultStore>,
    recognizer: Arc<dyn TextRecognizer>,
    invoker: CandidateInvoker,
    config: ExtractionConfig,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Assemble an extractor from explicit collaborators.
    pub fn new(
        config: ExtractionConfig,
        store: Arc<dyn ResultStore>,
        recognizer: Arc<dyn TextRecognizer>,
        model: Arc<dyn TextModel>,
    ) -> Self {
        let invoker = CandidateInvoker::new(model, config.api_timeout())
            .with_progress(config.progress_callback.clone());
        Self {
            store,
            recognizer,
            invoker,
            config,
        }
    }

    /// Default wiring: on-disk store under `cache_dir`, tesseract OCR and the
    /// Gemini REST client.
    ///
    /// Fails with [`ExtractionError::ProviderNotConfigured`] when no API key is set.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let model = GeminiClient::from_config(&config)?;
        let store = FsResultStore::new(config.cache_dir.clone());
        let recognizer = TesseractRecognizer::new(config.ocr.clone());
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(recognizer),
            Arc::new(model),
        ))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract the amounts from one uploaded image.
    pub async fn process(&self, image: &[u8]) -> Result<StructuredResult, ExtractionError> {
        self.process_detailed(image).await.map(|out| out.result)
    }

    /// Like [`Self::process`], also reporting how the result was obtained.
    pub async fn process_detailed(&self, image: &[u8]) -> Result<ExtractionOutput, ExtractionError> {
        let result = self.run(image).await;
        if let (Err(e), Some(cb)) = (&result, &self.config.progress_callback) {
            cb.on_extraction_error(&e.to_string());
        }
        result
    }

    /// Synchronous wrapper around [`Self::process`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn process_sync(&self, image: &[u8]) -> Result<StructuredResult, ExtractionError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ExtractionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.process(image))
    }

    /// Load a path or URL and extract it.
    pub async fn extract_input(&self, input_str: &str) -> Result<ExtractionOutput, ExtractionError> {
        let bytes = input::load_image(input_str, self.config.download_timeout_secs).await?;
        self.process_detailed(&bytes).await
    }

    /// Extract many inputs, at most `config.concurrency` at a time.
    ///
    /// One input failing does not affect the others. Results are returned in
    /// input order.
    pub async fn extract_inputs(
        &self,
        inputs: &[String],
    ) -> Vec<(String, Result<ExtractionOutput, ExtractionError>)> {
        let total = inputs.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let mut results: Vec<(usize, String, Result<ExtractionOutput, ExtractionError>)> =
            stream::iter(inputs.iter().enumerate().map(|(idx, input_str)| async move {
                let result = self.extract_input(input_str).await;
                if let Some(ref cb) = self.config.progress_callback {
                    let err = result.as_ref().err().map(|e| e.to_string());
                    cb.on_input_complete(input_str, err.as_deref());
                }
                (idx, input_str.clone(), result)
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(idx, _, _)| *idx);
        let success = results.iter().filter(|(_, _, r)| r.is_ok()).count();
        info!("Batch complete: {}/{} inputs succeeded", success, total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, success);
        }

        results
            .into_iter()
            .map(|(_, input_str, result)| (input_str, result))
            .collect()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn run(&self, image: &[u8]) -> Result<ExtractionOutput, ExtractionError> {
        let total_start = Instant::now();

        // ── Step 1: Reject empty uploads ─────────────────────────────────
        if image.is_empty() {
            return Err(ExtractionError::NoInput);
        }

        // ── Step 2: Fingerprint and consult the store ────────────────────
        let fingerprint = Fingerprint::of(image);
        debug!("Upload of {} bytes fingerprinted as {}", image.len(), fingerprint);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(&fingerprint);
        }

        match self.store.lookup(&fingerprint).await {
            Ok(Some(result)) => {
                info!("Cache hit for {}", fingerprint);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_cache_hit(&fingerprint);
                    cb.on_extraction_complete(&fingerprint, None);
                }
                return Ok(ExtractionOutput {
                    fingerprint,
                    result,
                    cache_hit: true,
                    model: None,
                    recognized_chars: 0,
                    recognition_duration_ms: 0,
                    invocation_duration_ms: 0,
                    total_duration_ms: total_start.elapsed().as_millis() as u64,
                });
            }
            Ok(None) => info!("Cache miss for {}", fingerprint),
            Err(e) => warn!("Store lookup failed for {}, treating as miss: {}", fingerprint, e),
        }

        // ── Step 3: Recognise text ───────────────────────────────────────
        let recognition_start = Instant::now();
        let text = self.recognizer.recognize(image).await?;
        let recognition_duration_ms = recognition_start.elapsed().as_millis() as u64;
        let recognized_chars = text.chars().count();
        debug!(
            "Recognised {} chars in {}ms",
            recognized_chars, recognition_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_text_recognized(&fingerprint, recognized_chars);
        }

        // ── Step 4: Build prompt and walk the candidates ─────────────────
        let prompt = build_extraction_prompt(
            &text,
            &self.config.default_currency,
            self.config.instructions.as_deref(),
        );
        let candidates = self.config.candidate_list().ok_or_else(|| {
            ExtractionError::InvalidConfig("no usable candidate model identifiers".into())
        })?;

        let invocation_start = Instant::now();
        let (reply, model) = match self.invoker.invoke(&prompt, &candidates).await {
            InvocationOutcome::Success { text, model } => (text, model),
            InvocationOutcome::FatalFailure { model, error } => {
                return Err(ExtractionError::FatalFailure {
                    model,
                    status_code: error.status_code(),
                    rate_limited: error.is_rate_limited(),
                    reason: error.to_string(),
                })
            }
            InvocationOutcome::RetryableFailure { attempted, reason } => {
                return Err(ExtractionError::NoAccessibleModel { attempted, reason })
            }
        };
        let invocation_duration_ms = invocation_start.elapsed().as_millis() as u64;

        // ── Step 5: Validate ─────────────────────────────────────────────
        let result = validate_response(&reply).map_err(|e| {
            warn!("Reply from {} failed validation: {}", model, e);
            ExtractionError::from(e)
        })?;

        // ── Step 6: Persist (best effort) ────────────────────────────────
        if let Err(e) = self.store.put(&fingerprint, image, &result).await {
            warn!("Failed to store result for {}: {}", fingerprint, e);
        }

        info!(
            "Extracted {} amount(s) for {} with {} in {}ms",
            result.amounts.len(),
            fingerprint,
            model,
            total_start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(&fingerprint, Some(&model));
        }

        Ok(ExtractionOutput {
            fingerprint,
            result,
            cache_hit: false,
            model: Some(model),
            recognized_chars,
            recognition_duration_ms,
            invocation_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        })
    }
}

/// Fingerprint a path or URL without any OCR or model call.
pub async fn fingerprint_input(
    input_str: &str,
    download_timeout_secs: u64,
) -> Result<Fingerprint, ExtractionError> {
    let bytes = input::load_image(input_str, download_timeout_secs).await?;
    if bytes.is_empty() {
        return Err(ExtractionError::NoInput);
    }
    Ok(Fingerprint::of(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelCallError, RecognitionError};
    use crate::store::MemoryResultStore;
    use async_trait::async_trait;

    struct FixedRecognizer;

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        async fn recognize(&self, _image: &[u8]) -> Result<String, RecognitionError> {
            Ok("TOTAL 12.00".into())
        }
    }

    struct FixedModel(Result<String, ModelCallError>);

    #[async_trait]
    impl TextModel for FixedModel {
        async fn generate(&self, _prompt: &str, _model: &str) -> Result<String, ModelCallError> {
            self.0.clone()
        }
    }

    fn extractor(reply: Result<String, ModelCallError>) -> Extractor {
        let config = ExtractionConfig::builder()
            .candidate_models(["m1"])
            .build()
            .unwrap();
        Extractor::new(
            config,
            Arc::new(MemoryResultStore::new()),
            Arc::new(FixedRecognizer),
            Arc::new(FixedModel(reply)),
        )
    }

    const REPLY: &str = r#"{"currency":"USD","amounts":[{"kind":"total_bill","value":12,"source":"TOTAL 12.00"}],"status":"ok"}"#;

    #[tokio::test]
    async fn detailed_output_reports_model_then_cache_hit() {
        let ex = extractor(Ok(REPLY.into()));
        let first = ex.process_detailed(b"img").await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.model.as_deref(), Some("m1"));
        assert_eq!(first.recognized_chars, 11);
        assert_eq!(first.fingerprint, Fingerprint::of(b"img"));

        let second = ex.process_detailed(b"img").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.model, None);
        assert_eq!(second.result, first.result);
    }

    #[tokio::test]
    async fn fatal_status_maps_to_fatal_failure() {
        let ex = extractor(Err(ModelCallError::Status {
            code: 403,
            text: "PERMISSION_DENIED".into(),
        }));
        let err = ex.process(b"img").await.unwrap_err();
        match err {
            ExtractionError::FatalFailure {
                model,
                status_code,
                rate_limited,
                ..
            } => {
                assert_eq!(model, "m1");
                assert_eq!(status_code, Some(403));
                assert!(!rate_limited);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fingerprint_input_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.png");
        let bytes = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        std::fs::write(&path, &bytes).unwrap();
        let fp = fingerprint_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(fp, Fingerprint::of(&bytes));
    }

    #[test]
    fn debug_does_not_leak_api_key() {
        let config = ExtractionConfig::builder().api_key("sk-hidden").build().unwrap();
        let ex = Extractor::from_config(config).unwrap();
        assert!(!format!("{ex:?}").contains("sk-hidden"));
    }
}

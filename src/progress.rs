//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as each upload moves through the pipeline: cache check, OCR, each
//! candidate model attempt, and the final outcome.
//!
//! # Example
//!
//! ```rust
//! use edgequake_billscan::{ExtractionConfig, ExtractionProgressCallback, Fingerprint};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CacheHitCounter {
//!     hits: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CacheHitCounter {
//!     fn on_cache_hit(&self, _fingerprint: &Fingerprint) {
//!         self.hits.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CacheHitCounter { hits: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::fingerprint::Fingerprint;
use std::sync::Arc;

/// Called by the pipeline at each stage boundary.
///
/// Implementations must be `Send + Sync`: batch extraction processes several
/// uploads concurrently, so any method may be called from multiple tasks at
/// once. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A batch of `total_inputs` inputs is about to be processed.
    fn on_batch_start(&self, total_inputs: usize) {
        let _ = total_inputs;
    }

    /// An upload has been fingerprinted and the cache is about to be checked.
    fn on_extraction_start(&self, fingerprint: &Fingerprint) {
        let _ = fingerprint;
    }

    /// The result was served from the store; no OCR or model call follows.
    fn on_cache_hit(&self, fingerprint: &Fingerprint) {
        let _ = fingerprint;
    }

    /// OCR finished with `chars` characters of text.
    fn on_text_recognized(&self, fingerprint: &Fingerprint, chars: usize) {
        let _ = (fingerprint, chars);
    }

    /// About to call candidate `model` (`attempt` is 1-indexed out of `total`).
    fn on_candidate_attempt(&self, model: &str, attempt: usize, total: usize) {
        let _ = (model, attempt, total);
    }

    /// Candidate `model` failed. `advancing` is true when the next candidate
    /// will be tried.
    fn on_candidate_failed(&self, model: &str, error: &str, advancing: bool) {
        let _ = (model, error, advancing);
    }

    /// Extraction succeeded. `model` is `None` for cache hits.
    fn on_extraction_complete(&self, fingerprint: &Fingerprint, model: Option<&str>) {
        let _ = (fingerprint, model);
    }

    /// Extraction failed with a fatal error.
    fn on_extraction_error(&self, error: &str) {
        let _ = error;
    }

    /// One batch input finished; `error` is `None` on success.
    fn on_input_complete(&self, input: &str, error: Option<&str>) {
        let _ = (input, error);
    }

    /// The whole batch finished.
    fn on_batch_complete(&self, total_inputs: usize, success_count: usize) {
        let _ = (total_inputs, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

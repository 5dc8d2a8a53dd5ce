//! Configuration types for bill extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Credentials and the override model
//! identifier live here too: the library never reads the environment itself,
//! so the pipeline can be exercised in tests without any global setup. The
//! CLI is the only place that maps environment variables onto these fields.

use crate::error::ExtractionError;
use crate::pipeline::invoke::CandidateList;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Model identifiers tried, in order, when no override is configured.
///
/// The set of models an API key can address varies by account and region, so
/// a short list of known-good identifiers is attempted until one exists.
pub const DEFAULT_CANDIDATE_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro",
];

/// Default Gemini REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Configuration for the extraction pipeline.
///
/// # Example
/// ```rust
/// use edgequake_billscan::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model_override("gemini-1.5-pro")
///     .api_key("test-key")
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.candidates()[0], "gemini-1.5-pro");
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Root directory of the on-disk result store. Default: `billscan-store`.
    pub cache_dir: PathBuf,

    /// Model tried before every candidate in `candidate_models`.
    pub model_override: Option<String>,

    /// Ordered fallback list of model identifiers.
    pub candidate_models: Vec<String>,

    /// API key for the model endpoint.
    pub api_key: Option<String>,

    /// Base URL of the model endpoint. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// Upper bound on each individual model call, in seconds. Default: 60.
    ///
    /// Applies per candidate, so the worst case for one request is
    /// `api_timeout_secs × candidates().len()`.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction is transcription, not generation; zero keeps replies
    /// reproducible for identical input.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 1024.
    pub max_output_tokens: u32,

    /// Currency code the model should assume when the bill shows none. Default: `USD`.
    pub default_currency: String,

    /// Replacement for the built-in extraction instructions.
    pub instructions: Option<String>,

    /// OCR engine settings.
    pub ocr: OcrSettings,

    /// Inputs processed at once by [`crate::extract::Extractor::extract_inputs`]. Default: 4.
    pub concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Receives pipeline events as each input moves through the stages.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("billscan-store"),
            model_override: None,
            candidate_models: DEFAULT_CANDIDATE_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_timeout_secs: 60,
            temperature: 0.0,
            max_output_tokens: 1024,
            default_currency: "USD".to_string(),
            instructions: None,
            ocr: OcrSettings::default(),
            concurrency: 4,
            download_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("cache_dir", &self.cache_dir)
            .field("model_override", &self.model_override)
            .field("candidate_models", &self.candidate_models)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("default_currency", &self.default_currency)
            .field("ocr", &self.ocr)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
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

    /// Candidate list for one request: the override first, then the
    /// configured fallbacks, de-duplicated, blanks dropped.
    pub fn candidate_list(&self) -> Option<CandidateList> {
        CandidateList::new(self.model_override.as_deref(), &self.candidate_models)
    }

    /// Identifiers of [`Self::candidate_list`], empty when none are usable.
    pub fn candidates(&self) -> Vec<String> {
        self.candidate_list()
            .map(|l| l.as_slice().to_vec())
            .unwrap_or_default()
    }

    /// Per-call timeout as a [`Duration`].
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.config.model_override = Some(model.into());
        self
    }

    pub fn candidate_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.candidate_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn default_currency(mut self, code: impl Into<String>) -> Self {
        self.config.default_currency = code.into();
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn ocr(mut self, ocr: OcrSettings) -> Self {
        self.config.ocr = ocr;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractionError> {
        let c = &self.config;
        if c.candidates().is_empty() {
            return Err(ExtractionError::InvalidConfig(
                "at least one candidate model (or an override) is required".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractionError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.default_currency.trim().is_empty() {
            return Err(ExtractionError::InvalidConfig(
                "default currency must not be empty".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(ExtractionError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── OCR settings ─────────────────────────────────────────────────────────

/// How the default tesseract recogniser prepares and reads an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Executable to run. Default: `tesseract`.
    pub tesseract_cmd: String,
    /// Tesseract language pack(s), e.g. `eng` or `eng+deu`. Default: `eng`.
    pub language: String,
    /// Convert to black and white before recognition. Default: true.
    ///
    /// Receipts are usually low-contrast thermal prints photographed under
    /// uneven light; a global threshold removes most of the background noise
    /// tesseract would otherwise read as stray glyphs.
    pub binarize: bool,
    /// Fixed luminance threshold (0–255). `None` picks one per image with
    /// Otsu's method. Default: `None`.
    pub threshold: Option<u8>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            language: "eng".to_string(),
            binarize: true,
            threshold: None,
        }
    }
}

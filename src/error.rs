//! Error types for the edgequake-billscan library.
//!
//! [`ExtractionError`] is the only error a caller of
//! [`crate::extract::Extractor::process`] ever sees. The remaining types
//! describe failures of a single collaborator and are wrapped into it:
//!
//! * [`RecognitionError`] — the OCR step could not produce text.
//! * [`ModelCallError`] — one call to the text model failed. The candidate
//!   invoker classifies these to decide whether the next model is worth trying.
//! * [`ValidationError`] — the model replied, but the reply is not a
//!   well-formed [`crate::output::StructuredResult`].
//! * [`StoreError`] — the result store failed. Never fatal: the pipeline logs
//!   it and still returns the freshly computed result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded image is empty.
    #[error("No input: the uploaded image is empty")]
    NoInput,

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not an image format we can decode.
    #[error("'{input}' is not a supported image (PNG or JPEG)\nFirst bytes: {magic:?}")]
    NotAnImage { input: String, magic: Vec<u8> },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// OCR produced no usable text.
    #[error("Text recognition failed: {source}")]
    RecognitionFailed {
        #[from]
        source: RecognitionError,
    },

    /// Every candidate model reported itself unavailable.
    #[error(
        "No accessible model: tried {}, last error: {reason}\n{}",
        candidate_summary(.attempted),
        NO_MODEL_HINT
    )]
    NoAccessibleModel {
        attempted: Vec<String>,
        reason: String,
    },

    /// A model call failed in a way that trying another candidate cannot fix.
    #[error(
        "Model '{model}' failed ({}): {reason}\n{}",
        status_label(.status_code),
        fatal_hint(.status_code, .rate_limited)
    )]
    FatalFailure {
        model: String,
        status_code: Option<u16>,
        rate_limited: bool,
        reason: String,
    },

    /// The model replied, but its reply failed structural validation.
    #[error("Malformed model response: {source}")]
    MalformedExternalResponse {
        #[from]
        source: ValidationError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The model provider cannot be constructed (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

const NO_MODEL_HINT: &str =
    "Configure an override model identifier (--model / BILLSCAN_MODEL) that your account can access.";
const RATE_LIMIT_HINT: &str = "The model quota is exhausted. Wait and retry later.";
const ACCESS_HINT: &str = "Check the API key, the account's model access and the endpoint URL.";
const NO_RESPONSE_HINT: &str =
    "The model endpoint did not answer in time or the connection failed. Retry, or raise --api-timeout.";

fn candidate_summary(attempted: &[String]) -> String {
    format!("{} candidate(s) [{}]", attempted.len(), attempted.join(", "))
}

fn status_label(code: &Option<u16>) -> String {
    match code {
        Some(c) => format!("HTTP {c}"),
        None => "no HTTP status".to_string(),
    }
}

fn fatal_hint(status_code: &Option<u16>, rate_limited: &bool) -> &'static str {
    match (status_code, rate_limited) {
        (_, true) => RATE_LIMIT_HINT,
        (None, false) => NO_RESPONSE_HINT,
        (Some(_), false) => ACCESS_HINT,
    }
}

impl ExtractionError {
    /// HTTP status a transport layer should answer with for this error.
    ///
    /// Keeps the four caller-actionable classes apart: bad input (400),
    /// quota exhaustion (429), upstream or access failure (502/404) and an
    /// unusable model reply (500).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoInput | Self::InvalidInput { .. } | Self::NotAnImage { .. } => 400,
            Self::FileNotFound { .. } => 404,
            Self::PermissionDenied { .. } => 403,
            Self::DownloadFailed { .. } => 502,
            Self::DownloadTimeout { .. } => 504,
            Self::RecognitionFailed { .. } => 422,
            Self::NoAccessibleModel { .. } => 404,
            Self::FatalFailure {
                rate_limited: true, ..
            } => 429,
            Self::FatalFailure { .. } => 502,
            Self::MalformedExternalResponse { .. } => 500,
            Self::ProviderNotConfigured { .. } | Self::InvalidConfig(_) | Self::Internal(_) => 500,
        }
    }

    /// Remediation the caller can act on, if there is a specific one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoAccessibleModel { .. } => Some(NO_MODEL_HINT),
            Self::FatalFailure {
                status_code,
                rate_limited,
                ..
            } => Some(fatal_hint(status_code, rate_limited)),
            _ => None,
        }
    }

    /// True when the failure is quota exhaustion at the model provider.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::FatalFailure {
                rate_limited: true,
                ..
            }
        )
    }
}

/// Failure of the OCR collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    /// The bytes could not be decoded as an image.
    #[error("could not decode image: {0}")]
    Decode(String),

    /// The OCR engine binary could not be started.
    #[error("OCR engine '{cmd}' is not available: {detail}\nInstall tesseract or pass --tesseract-cmd.")]
    EngineUnavailable { cmd: String, detail: String },

    /// The OCR engine ran but exited unsuccessfully.
    #[error("OCR engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    /// The engine succeeded but found no text.
    #[error("no text was recognised in the image")]
    NoText,

    /// Scratch-file or task failure around the engine.
    #[error("OCR I/O error: {0}")]
    Io(String),
}

/// Failure of a single call to the text model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelCallError {
    /// The endpoint answered with a non-success status.
    #[error("HTTP {code} {text}")]
    Status { code: u16, text: String },

    /// No answer within the configured bound.
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or request-building failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// 2xx answer whose body carries no generated text.
    #[error("unreadable model reply: {0}")]
    InvalidBody(String),
}

impl ModelCallError {
    /// HTTP status code, when the endpoint produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The model identifier does not exist or is not visible to this account.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code() == Some(429)
    }
}

/// Structural problem in a model reply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("reply is not valid JSON: {0}")]
    NotJson(String),

    #[error("reply must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),

    #[error("field `{field}` is invalid: {problem}")]
    InvalidField { field: String, problem: String },

    #[error("unrecognised amount kind '{0}' (expected total_bill, paid or due)")]
    UnknownKind(String),

    #[error("amount kind '{0}' appears more than once")]
    DuplicateKind(String),

    #[error("unexpected status '{0}' (expected \"ok\")")]
    UnexpectedStatus(String),
}

/// Failure of the result store. Logged by the pipeline, never returned.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored result '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

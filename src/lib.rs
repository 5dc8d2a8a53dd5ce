//! # edgequake-billscan
//!
//! Extract the total, paid and due amounts from photographed bills and
//! receipts, with a content-addressed result cache in front of every
//! expensive step.
//!
//! ## Why this crate?
//!
//! Receipt photos are noisy and language models are slow, metered and
//! occasionally unreachable. This crate runs a deterministic OCR pass first,
//! asks a text model to turn the OCR text into a strict JSON record, refuses
//! anything that does not validate, and remembers every accepted answer by the
//! SHA-256 of the upload so the same image is never paid for twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image bytes
//!  │
//!  ├─ 1. Guard       empty upload → NoInput
//!  ├─ 2. Fingerprint SHA-256 of the bytes
//!  ├─ 3. Lookup      stored result? return it, nothing else runs
//!  ├─ 4. Recognise   Otsu binarisation + tesseract (spawn_blocking / child process)
//!  ├─ 5. Prompt      OCR text + schema + default currency
//!  ├─ 6. Invoke      candidate models in order; 404 → next, anything else stops
//!  ├─ 7. Validate    strip fences, parse JSON, check every field
//!  └─ 8. Put         persist bytes + result (failure only logged)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_billscan::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .default_currency("EUR")
//!         .build()?;
//!     let extractor = Extractor::from_config(config)?;
//!
//!     let result = extractor.process(&std::fs::read("receipt.jpg")?).await?;
//!     for amount in &result.amounts {
//!         println!("{}: {} {}", amount.kind, amount.value, result.currency);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `billscan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-billscan = { version = "0.1", default-features = false }
//! ```
//!
//! ## Swapping collaborators
//!
//! [`Extractor::new`] takes the store, recogniser and model as trait objects
//! ([`ResultStore`], [`TextRecognizer`], [`TextModel`]). Tests use
//! [`MemoryResultStore`] and scripted stubs; production uses
//! [`Extractor::from_config`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, OcrSettings};
pub use error::{ExtractionError, ModelCallError, RecognitionError, StoreError, ValidationError};
pub use extract::{fingerprint_input, Extractor};
pub use fingerprint::{Fingerprint, InvalidFingerprint};
pub use output::{AmountEntry, AmountKind, ExtractionOutput, ExtractionStatus, StructuredResult};
pub use pipeline::invoke::{CandidateInvoker, CandidateList, InvocationOutcome};
pub use pipeline::model::{GeminiClient, TextModel};
pub use pipeline::recognize::{TesseractRecognizer, TextRecognizer};
pub use pipeline::validate::validate_response;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{FsResultStore, MemoryResultStore, ResultStore};

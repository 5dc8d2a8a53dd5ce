//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its own
//! and the external collaborators (OCR engine, text model) sit behind traits
//! that tests can stub.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ preprocess ──▶ recognize ──▶ invoke(model) ──▶ validate
//! (path/URL)  (Otsu B/W)    (tesseract)   (fallback walk)   (typed result)
//! ```
//!
//! 1. [`input`]      — read a local file or download a URL, sniff the format
//! 2. [`preprocess`] — grayscale and binarise; CPU-bound, run in `spawn_blocking`
//! 3. [`recognize`]  — [`recognize::TextRecognizer`] and the tesseract backend
//! 4. [`model`]      — [`model::TextModel`] and the Gemini REST client; the
//!    only stage with network I/O besides URL download
//! 5. [`invoke`]     — walk the candidate model list under the fallback policy
//! 6. [`validate`]   — strip fences, parse and check the model's JSON

pub mod input;
pub mod invoke;
pub mod model;
pub mod preprocess;
pub mod recognize;
pub mod validate;

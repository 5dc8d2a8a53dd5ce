//! Text recognition: image bytes in, best-effort text out.
//!
//! The pipeline only sees the [`TextRecognizer`] trait. The default
//! [`TesseractRecognizer`] shells out to the `tesseract` CLI after
//! [`crate::pipeline::preprocess`] has produced a clean black-and-white PNG.

use crate::config::OcrSettings;
use crate::error::RecognitionError;
use crate::pipeline::preprocess::prepare_for_ocr;
use async_trait::async_trait;
use tracing::debug;

/// Produces recognised text from an uploaded image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<String, RecognitionError>;
}

/// Recogniser backed by the `tesseract` command-line engine.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    settings: OcrSettings,
}

impl TesseractRecognizer {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<String, RecognitionError> {
        // Decoding and thresholding are CPU-bound; keep them off the executor.
        let bytes = image.to_vec();
        let settings = self.settings.clone();
        let png = tokio::task::spawn_blocking(move || prepare_for_ocr(&bytes, &settings))
            .await
            .map_err(|e| RecognitionError::Io(format!("preprocessing task failed: {e}")))??;

        // Deleted when `scratch` drops, including on early return.
        let scratch = tempfile::Builder::new()
            .prefix("billscan-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| RecognitionError::Io(e.to_string()))?;
        tokio::fs::write(scratch.path(), &png)
            .await
            .map_err(|e| RecognitionError::Io(e.to_string()))?;

        let output = tokio::process::Command::new(&self.settings.tesseract_cmd)
            .arg(scratch.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RecognitionError::EngineUnavailable {
                cmd: self.settings.tesseract_cmd.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RecognitionError::EngineFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = normalize_ocr_text(&String::from_utf8_lossy(&output.stdout));
        debug!("Recognised {} chars", text.len());
        if text.is_empty() {
            return Err(RecognitionError::NoText);
        }
        Ok(text)
    }
}

/// Tidy raw engine output: drop form feeds, trailing spaces and blank lines.
pub fn normalize_ocr_text(raw: &str) -> String {
    raw.replace('\u{000C}', "\n")
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

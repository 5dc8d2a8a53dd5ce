//! External text model: one prompt in, one reply out, for a named model.
//!
//! [`TextModel`] is the seam the candidate invoker drives. It deliberately
//! reports failures with their HTTP status ([`ModelCallError::Status`]) and
//! nothing more: deciding whether a failure is worth another candidate is
//! the invoker's job, not the transport's.
//!
//! [`GeminiClient`] is the default implementation, speaking the Gemini
//! `generateContent` REST API over reqwest.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, ModelCallError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A text-understanding service addressable by model identifier.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Send `prompt` to `model` and return the generated text.
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ModelCallError>;
}

/// Gemini REST client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout_secs: u64,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl GeminiClient {
    /// Build a client from the extraction config.
    ///
    /// Fails with [`ExtractionError::ProviderNotConfigured`] when no API key
    /// is set.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractionError::ProviderNotConfigured {
                provider: "gemini".to_string(),
                hint: "Set GEMINI_API_KEY or pass --api-key.".to_string(),
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ModelCallError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .http
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelCallError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ModelCallError::Transport(e.to_string())
                }
            })?;

        // The status decides the fallback; a broken error body must not hide it.
        let status = response.status();
        let body = response.bytes().await;
        if !status.is_success() {
            return Err(status_error(status, body.as_deref().ok()));
        }

        let bytes = body.map_err(|e| {
            if e.is_timeout() {
                ModelCallError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                ModelCallError::Transport(e.to_string())
            }
        })?;

        debug!("Model {}: {} byte reply", model, bytes.len());
        extract_reply_text(&bytes)
    }
}

fn status_error(status: reqwest::StatusCode, body: Option<&[u8]>) -> ModelCallError {
    ModelCallError::Status {
        code: status.as_u16(),
        text: status_text(status, body.unwrap_or_default()),
    }
}

/// Human-readable status text: the API's own error message when it sent
/// one, else the canonical reason phrase.
fn status_text(status: reqwest::StatusCode, body: &[u8]) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => format!("{reason}: {}", env.error.message),
        _ => reason,
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_reply_text(body: &[u8]) -> Result<String, ModelCallError> {
    let parsed: GenerateResponse = serde_json::from_slice(body)
        .map_err(|e| ModelCallError::InvalidBody(format!("not a generateContent reply: {e}")))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelCallError::InvalidBody("reply has no candidates".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ModelCallError::InvalidBody(format!(
            "reply has no text (finish reason: {reason})"
        )));
    }
    Ok(text)
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

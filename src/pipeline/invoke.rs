//! Candidate invocation: try an ordered list of models until one answers.
//!
//! Which model identifiers an API key can reach depends on the account and
//! region and changes without notice. Rather than hard-failing when one
//! identifier disappears, the invoker walks a short ordered list.
//!
//! ## Fallback policy
//!
//! Every call result is mapped by the pure function [`classify`]:
//!
//! | Result | Disposition |
//! |--------|-------------|
//! | `Ok(text)` | [`Disposition::StopSuccess`] |
//! | HTTP 404 (model not found / unavailable) | [`Disposition::Advance`] |
//! | HTTP 429 (rate limited) | [`Disposition::StopFatal`] |
//! | anything else (other status, timeout, transport, empty body) | [`Disposition::StopFatal`] |
//!
//! A 429 stops the walk: the quota is per key, so the next candidate would
//! be rejected too and only burn more quota. Each candidate is attempted at
//! most once per invocation and the whole walk is never repeated.

use crate::error::ModelCallError;
use crate::pipeline::model::TextModel;
use crate::progress::ProgressCallback;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ordered, non-empty list of model identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList(Vec<String>);

impl CandidateList {
    /// Build a list from an optional override plus fallbacks.
    ///
    /// The override takes position 0; later duplicates and blank entries are
    /// dropped. Returns `None` when nothing usable remains.
    pub fn new<S: AsRef<str>>(model_override: Option<&str>, fallbacks: &[S]) -> Option<Self> {
        let mut models: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
        let all = model_override
            .into_iter()
            .chain(fallbacks.iter().map(|s| s.as_ref()))
            .map(str::trim)
            .filter(|m| !m.is_empty());
        for model in all {
            if !models.iter().any(|seen| seen == model) {
                models.push(model.to_string());
            }
        }
        (!models.is_empty()).then_some(Self(models))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a constructed list.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Result of walking a [`CandidateList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// A candidate produced text.
    Success { text: String, model: String },
    /// Every candidate was unavailable. Points at configuration or account
    /// access rather than at one bad call.
    RetryableFailure {
        attempted: Vec<String>,
        reason: String,
    },
    /// A candidate failed in a way no other candidate can fix.
    FatalFailure { model: String, error: ModelCallError },
}

/// What to do after one candidate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    StopSuccess,
    Advance,
    StopFatal,
}

/// Map one call result onto the fallback policy.
pub fn classify(result: &Result<String, ModelCallError>) -> Disposition {
    match result {
        Ok(_) => Disposition::StopSuccess,
        Err(e) if e.is_not_found() => Disposition::Advance,
        Err(_) => Disposition::StopFatal,
    }
}

/// Drives a [`TextModel`] across a [`CandidateList`].
#[derive(Clone)]
pub struct CandidateInvoker {
    model: Arc<dyn TextModel>,
    timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl CandidateInvoker {
    /// `timeout` bounds each individual candidate call.
    pub fn new(model: Arc<dyn TextModel>, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Try each candidate in order until one succeeds or a fatal failure stops the walk.
    pub async fn invoke(&self, prompt: &str, candidates: &CandidateList) -> InvocationOutcome {
        let total = candidates.len();
        let mut attempted: Vec<String> = Vec::with_capacity(total);
        let mut last_reason = String::from("no candidates");

        for (i, model) in candidates.iter().enumerate() {
            if let Some(ref cb) = self.progress {
                cb.on_candidate_attempt(model, i + 1, total);
            }
            debug!("Calling model {} ({}/{})", model, i + 1, total);
            attempted.push(model.to_string());

            let result = self.call_bounded(prompt, model).await;
            match (classify(&result), result) {
                (_, Ok(text)) => {
                    info!("Model {} answered ({} chars)", model, text.len());
                    return InvocationOutcome::Success {
                        text,
                        model: model.to_string(),
                    };
                }
                (Disposition::Advance, Err(error)) => {
                    warn!("Model {} unavailable ({}), trying next candidate", model, error);
                    if let Some(ref cb) = self.progress {
                        cb.on_candidate_failed(model, &error.to_string(), true);
                    }
                    last_reason = error.to_string();
                }
                (_, Err(error)) => {
                    warn!("Model {} failed fatally: {}", model, error);
                    if let Some(ref cb) = self.progress {
                        cb.on_candidate_failed(model, &error.to_string(), false);
                    }
                    return InvocationOutcome::FatalFailure {
                        model: model.to_string(),
                        error,
                    };
                }
            }
        }

        warn!("No candidate model succeeded after {} attempt(s)", attempted.len());
        InvocationOutcome::RetryableFailure {
            attempted,
            reason: last_reason,
        }
    }

    async fn call_bounded(&self, prompt: &str, model: &str) -> Result<String, ModelCallError> {
        match tokio::time::timeout(self.timeout, self.model.generate(prompt, model)).await {
            Ok(result) => result,
            Err(_) => Err(ModelCallError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

//! Output types: the validated extraction result and its run report.
//!
//! [`StructuredResult`] is the exact document persisted in the result store
//! and returned to callers; its serialised form is the public wire format:
//!
//! ```json
//! {"currency":"USD","amounts":[{"kind":"total_bill","value":100.0,"source":"Total: $100"}],"status":"ok"}
//! ```

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which monetary field an [`AmountEntry`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountKind {
    /// Grand total of the bill.
    TotalBill,
    /// Amount already paid.
    Paid,
    /// Outstanding balance.
    Due,
}

impl AmountKind {
    pub const ALL: [AmountKind; 3] = [AmountKind::TotalBill, AmountKind::Paid, AmountKind::Due];

    /// Wire name, as it appears in model replies and stored JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountKind::TotalBill => "total_bill",
            AmountKind::Paid => "paid",
            AmountKind::Due => "due",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for AmountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted amount together with the text span it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountEntry {
    pub kind: AmountKind,
    /// Finite, non-negative amount in `currency` units.
    pub value: f64,
    /// Verbatim span of the recognised text that backs this amount.
    pub source: String,
}

/// Terminal status of a successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    Ok,
}

/// Validated extraction output.
///
/// `amounts` keeps the model's order, holds each [`AmountKind`] at most once
/// and simply omits kinds that were not found on the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    /// Currency code, e.g. `USD`.
    pub currency: String,
    pub amounts: Vec<AmountEntry>,
    pub status: ExtractionStatus,
}

impl StructuredResult {
    /// Look up the entry for one kind.
    pub fn amount(&self, kind: AmountKind) -> Option<&AmountEntry> {
        self.amounts.iter().find(|a| a.kind == kind)
    }
}

/// A [`StructuredResult`] plus how it was obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub fingerprint: Fingerprint,
    pub result: StructuredResult,
    /// True when the result came from the store without any external work.
    pub cache_hit: bool,
    /// Model identifier that produced the result; `None` on a cache hit.
    pub model: Option<String>,
    /// Characters of OCR text sent to the model; 0 on a cache hit.
    pub recognized_chars: usize,
    pub recognition_duration_ms: u64,
    pub invocation_duration_ms: u64,
    pub total_duration_ms: u64,
}

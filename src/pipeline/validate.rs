//! Response validation: the trust boundary between free-form model text and
//! the typed [`StructuredResult`].
//!
//! Nothing reaches the store or the caller unless it passed every check here.
//! The reply is walked as an untyped `serde_json::Value` rather than
//! deserialised straight into the output types, so each rejection can name
//! the exact field and problem.
//!
//! ## Checks (in order)
//!
//! 1. Strip an outer ```` ```json ```` / ```` ``` ```` fence (models add them
//!    despite being told not to)
//! 2. Parse as JSON; the top level must be an object
//! 3. `currency`: required, non-empty string
//! 4. `status`: required, must be `"ok"`
//! 5. `amounts`: required array; per entry `kind` ∈ {total_bill, paid, due},
//!    `value` a finite non-negative number (or numeric string), `source` a
//!    non-empty string, and no kind twice
//!
//! Unknown extra fields are ignored. A kind that is simply absent is fine.

use crate::error::ValidationError;
use crate::output::{AmountEntry, AmountKind, ExtractionStatus, StructuredResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n?(.*?)\r?\n?```$").unwrap());

/// Remove one pair of surrounding code fences, if present.
pub fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Parse and structurally validate a raw model reply.
pub fn validate_response(raw: &str) -> Result<StructuredResult, ValidationError> {
    let payload = strip_code_fences(raw);
    let doc: Value =
        serde_json::from_str(payload).map_err(|e| ValidationError::NotJson(e.to_string()))?;
    let obj = doc
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject(json_type(&doc).to_string()))?;

    let currency = required_string(obj, "currency")?;
    validate_status(obj)?;

    let entries = match obj.get("amounts") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("amounts")),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ValidationError::InvalidField {
                field: "amounts".into(),
                problem: format!("expected an array, got {}", json_type(other)),
            })
        }
    };

    let mut amounts: Vec<AmountEntry> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let parsed = validate_entry(i, entry)?;
        if amounts.iter().any(|a| a.kind == parsed.kind) {
            return Err(ValidationError::DuplicateKind(parsed.kind.to_string()));
        }
        amounts.push(parsed);
    }

    Ok(StructuredResult {
        currency,
        amounts,
        status: ExtractionStatus::Ok,
    })
}

fn validate_status(obj: &Map<String, Value>) -> Result<(), ValidationError> {
    match obj.get("status") {
        None | Some(Value::Null) => Err(ValidationError::MissingField("status")),
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("ok") => Ok(()),
        Some(Value::String(s)) => Err(ValidationError::UnexpectedStatus(s.clone())),
        Some(other) => Err(ValidationError::UnexpectedStatus(other.to_string())),
    }
}

fn validate_entry(index: usize, entry: &Value) -> Result<AmountEntry, ValidationError> {
    let field = |name: &str| format!("amounts[{index}].{name}");
    let obj = entry.as_object().ok_or_else(|| ValidationError::InvalidField {
        field: format!("amounts[{index}]"),
        problem: format!("expected an object, got {}", json_type(entry)),
    })?;

    let kind = match obj.get("kind") {
        Some(Value::String(s)) => {
            AmountKind::parse(s.trim()).ok_or_else(|| ValidationError::UnknownKind(s.clone()))?
        }
        None | Some(Value::Null) => {
            return Err(ValidationError::InvalidField {
                field: field("kind"),
                problem: "missing".into(),
            })
        }
        Some(other) => return Err(ValidationError::UnknownKind(other.to_string())),
    };

    let value = match obj.get("value") {
        Some(v) => parse_amount(v).map_err(|problem| ValidationError::InvalidField {
            field: field("value"),
            problem,
        })?,
        None => {
            return Err(ValidationError::InvalidField {
                field: field("value"),
                problem: "missing".into(),
            })
        }
    };

    let source = match obj.get("source") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(ValidationError::InvalidField {
                field: field("source"),
                problem: "empty".into(),
            })
        }
        Some(other) => {
            return Err(ValidationError::InvalidField {
                field: field("source"),
                problem: format!("expected a string, got {}", json_type(other)),
            })
        }
        None => {
            return Err(ValidationError::InvalidField {
                field: field("source"),
                problem: "missing".into(),
            })
        }
    };

    Ok(AmountEntry {
        kind,
        value,
        source,
    })
}

/// Accept a JSON number, or a string holding one with optional thousands
/// separators (`"1,234.50"`).
fn parse_amount(v: &Value) -> Result<f64, String> {
    let n = match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{n} is not representable as a float"))?,
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
                .collect();
            cleaned
                .parse::<f64>()
                .map_err(|_| format!("'{s}' is not a number"))?
        }
        other => return Err(format!("expected a number, got {}", json_type(other))),
    };
    if !n.is_finite() {
        return Err(format!("{n} is not finite"));
    }
    if n < 0.0 {
        return Err(format!("{n} is negative"));
    }
    Ok(n)
}

fn required_string(obj: &Map<String, Value>, name: &'static str) -> Result<String, ValidationError> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(name)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(ValidationError::InvalidField {
            field: name.to_string(),
            problem: "empty".into(),
        }),
        Some(other) => Err(ValidationError::InvalidField {
            field: name.to_string(),
            problem: format!("expected a string, got {}", json_type(other)),
        }),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

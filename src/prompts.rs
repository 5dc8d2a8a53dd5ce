//! Prompts for turning OCR text into a [`crate::output::StructuredResult`].
//!
//! Every prompt lives here so wording can change without touching the
//! invoker or the validator, and so tests can inspect prompts directly.
//!
//! Callers can replace the instructions via
//! [`crate::config::ExtractionConfig::instructions`]; the recognised text and
//! the default currency are always appended by [`build_extraction_prompt`].

/// Placeholder replaced with the configured default currency code.
pub const CURRENCY_PLACEHOLDER: &str = "{default_currency}";

/// Default instructions for extracting bill amounts from OCR text.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are an expert at reading bills, invoices and receipts. The text below was produced by OCR from a photo of such a document and may contain recognition noise.

Extract the monetary amounts and reply with a single JSON object of exactly this shape:

{
  "currency": "<ISO 4217 code>",
  "amounts": [
    { "kind": "total_bill", "value": <number>, "source": "<verbatim text>" },
    { "kind": "paid",       "value": <number>, "source": "<verbatim text>" },
    { "kind": "due",        "value": <number>, "source": "<verbatim text>" }
  ],
  "status": "ok"
}

Follow these rules precisely:

1. FIELDS
   - "total_bill": the grand total of the bill, after tax and discounts
   - "paid": the amount already paid (cash, card, tendered, advance)
   - "due": the balance still owed
   - Use no other "kind" values. Include each kind at most once.
   - Omit a kind entirely when the document does not state it. Never guess.

2. VALUES
   - "value" is a plain JSON number: no currency symbol, no thousands separator
   - Values are never negative

3. SOURCE
   - "source" quotes the exact span of the OCR text the value was read from,
     including its label (e.g. "Total: $100")

4. CURRENCY
   - Infer the currency from symbols or codes in the text ($, €, £, ₹, USD …)
   - If the text shows no currency, use "{default_currency}"

5. OCR NOISE
   - Correct obvious recognition errors inside numbers: O→0, o→0, l→1, I→1, S→5, B→8
   - Treat a comma or space inside a number as a thousands separator unless it is
     clearly the decimal separator of the document's locale

6. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations"#;

/// Build the full prompt for one upload.
///
/// `instructions` overrides [`DEFAULT_INSTRUCTIONS`]. Both may reference
/// [`CURRENCY_PLACEHOLDER`]. The OCR text is fenced with triple quotes so
/// the model can tell it apart from the instructions.
pub fn build_extraction_prompt(
    recognized_text: &str,
    default_currency: &str,
    instructions: Option<&str>,
) -> String {
    let instructions = instructions
        .unwrap_or(DEFAULT_INSTRUCTIONS)
        .replace(CURRENCY_PLACEHOLDER, default_currency);
    format!(
        "{}\n\nOCR text:\n\"\"\"\n{}\n\"\"\"",
        instructions,
        recognized_text.trim()
    )
}

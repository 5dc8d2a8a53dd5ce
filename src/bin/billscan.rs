//! CLI binary for edgequake-billscan.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ExtractionConfig` and prints results as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_billscan::{
    fingerprint_input, ExtractionConfig, ExtractionError, ExtractionProgressCallback, Extractor,
    Fingerprint, OcrSettings, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a bar across the batch plus one log line per input. Inputs may
/// finish out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    cache_hits: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}/{len} images  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            cache_hits: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_inputs: usize) {
        self.bar.set_length(total_inputs as u64);
        self.bar.reset_eta();
    }

    fn on_cache_hit(&self, fingerprint: &Fingerprint) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
        self.bar
            .set_message(format!("cached {}", &fingerprint.as_str()[..12]));
    }

    fn on_text_recognized(&self, _fingerprint: &Fingerprint, chars: usize) {
        self.bar.set_message(format!("OCR {chars} chars"));
    }

    fn on_candidate_attempt(&self, model: &str, attempt: usize, total: usize) {
        self.bar.set_message(format!("{model} ({attempt}/{total})"));
    }

    fn on_candidate_failed(&self, model: &str, error: &str, advancing: bool) {
        if advancing {
            self.bar
                .println(format!("  {} {model} unavailable: {}", cyan("↷"), dim(error)));
        }
    }

    fn on_input_complete(&self, input: &str, error: Option<&str>) {
        match error {
            None => self.bar.println(format!("  {} {input}", green("✓"))),
            Some(e) => {
                let first_line = e.lines().next().unwrap_or(e);
                self.bar
                    .println(format!("  {} {input}  {}", red("✗"), red(first_line)));
            }
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_inputs: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_inputs.saturating_sub(success_count);
        let hits = self.cache_hits.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} image(s) extracted  {}",
                green("✔"),
                bold(&success_count.to_string()),
                dim(&format!("({hits} from cache)"))
            );
        } else {
            eprintln!(
                "{} {}/{} image(s) extracted  ({} failed)",
                if failed == total_inputs {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_inputs,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one receipt (prints JSON)
  billscan receipt.jpg

  # Several images, including a URL, with timings and cache info
  billscan --detailed a.png b.jpg https://example.com/bill.png

  # Pin a model that your key can access
  billscan --model gemini-1.5-pro receipt.jpg

  # Default currency for bills that show no symbol
  billscan --currency EUR receipt.jpg

  # Print fingerprints only (no OCR, no API key needed)
  billscan --fingerprint-only *.jpg

OUTPUT:
  One input   pretty-printed JSON object
  Several     one compact JSON object per line, in input order

  {"currency":"USD","amounts":[{"kind":"total_bill","value":100.0,"source":"Total: $100"}],"status":"ok"}

EXIT STATUS:
  0  every input succeeded
  1  at least one input failed (details and HTTP status class on stderr)

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  BILLSCAN_MODEL          Model tried before the candidate list
  BILLSCAN_CANDIDATES     Comma-separated fallback model list
  BILLSCAN_CACHE_DIR      Result store directory
  BILLSCAN_CURRENCY       Default currency code
  BILLSCAN_TESSERACT      tesseract executable
  BILLSCAN_LANG           tesseract language(s)
  RUST_LOG                Overrides --verbose / --quiet log filtering

SETUP:
  1. Install tesseract:  apt install tesseract-ocr   (or brew install tesseract)
  2. Set API key:        export GEMINI_API_KEY=...
  3. Extract:            billscan receipt.jpg
"#;

/// Extract bill amounts from receipt images using OCR and an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "billscan",
    version,
    about = "Extract total, paid and due amounts from bill images",
    long_about = "Extract the total, paid and due amounts from photographed bills and receipts. \
Text is recognised locally with tesseract, structured by a Gemini model, validated, and cached \
by image content so the same image is never processed twice.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths (PNG/JPEG) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model tried before the candidate list.
    #[arg(short, long, env = "BILLSCAN_MODEL")]
    model: Option<String>,

    /// Ordered fallback models, comma-separated.
    #[arg(long, env = "BILLSCAN_CANDIDATES", value_delimiter = ',')]
    candidates: Vec<String>,

    /// Model endpoint base URL.
    #[arg(long, env = "BILLSCAN_API_BASE")]
    api_base: Option<String>,

    /// Result store directory.
    #[arg(long, env = "BILLSCAN_CACHE_DIR", default_value = "billscan-store")]
    cache_dir: PathBuf,

    /// Per-model-call timeout in seconds.
    #[arg(long, env = "BILLSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Currency assumed when the bill shows none.
    #[arg(long, env = "BILLSCAN_CURRENCY", default_value = "USD")]
    currency: String,

    /// Path to a text file replacing the built-in extraction instructions.
    #[arg(long, env = "BILLSCAN_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "BILLSCAN_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "BILLSCAN_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: u32,

    /// tesseract executable.
    #[arg(long, env = "BILLSCAN_TESSERACT", default_value = "tesseract")]
    tesseract_cmd: String,

    /// tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "BILLSCAN_LANG", default_value = "eng")]
    lang: String,

    /// Skip black-and-white conversion before OCR.
    #[arg(long)]
    no_binarize: bool,

    /// Fixed binarisation threshold (0–255) instead of Otsu's.
    #[arg(long)]
    threshold: Option<u8>,

    /// Images processed at once.
    #[arg(short, long, env = "BILLSCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "BILLSCAN_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Print fingerprint, cache hit, model and timings with each result.
    #[arg(long)]
    detailed: bool,

    /// Print `<fingerprint>  <input>` per image without extracting.
    #[arg(long)]
    fingerprint_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "BILLSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BILLSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, env = "BILLSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.fingerprint_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Fingerprint-only mode ────────────────────────────────────────────
    if cli.fingerprint_only {
        let mut failed = 0usize;
        for input in &cli.inputs {
            match fingerprint_input(input, cli.download_timeout).await {
                Ok(fp) => println!("{fp}  {input}"),
                Err(e) => {
                    failed += 1;
                    report_failure(input, &e);
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} input(s) failed", cli.inputs.len());
        }
        return Ok(());
    }

    // ── Build extractor ──────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;
    let extractor = Extractor::from_config(config).context("Failed to set up extractor")?;

    // ── Run extraction ───────────────────────────────────────────────────
    let results = extractor.extract_inputs(&cli.inputs).await;
    let single = results.len() == 1;
    let mut failed = 0usize;

    for (input, result) in &results {
        match result {
            Ok(output) => {
                let json = match (cli.detailed, single) {
                    (true, true) => serde_json::to_string_pretty(output),
                    (true, false) => serde_json::to_string(output),
                    (false, true) => serde_json::to_string_pretty(&output.result),
                    (false, false) => serde_json::to_string(&output.result),
                }
                .context("Failed to serialise result")?;
                println!("{json}");

                if cli.detailed && !cli.quiet && !show_progress {
                    eprintln!(
                        "{}  {}  {}",
                        dim(input),
                        if output.cache_hit {
                            "cache hit".to_string()
                        } else {
                            output.model.clone().unwrap_or_default()
                        },
                        dim(&format!("{}ms", output.total_duration_ms)),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                report_failure(input, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} input(s) failed", results.len());
    }
    Ok(())
}

/// Print an extraction error with its HTTP status class and remediation.
fn report_failure(input: &str, e: &ExtractionError) {
    eprintln!("{} {}  [HTTP {}]", red("error:"), bold(input), e.http_status());
    eprintln!("  {e}");
    if let Some(hint) = e.hint() {
        eprintln!("  {} {hint}", cyan("hint:"));
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let instructions = if let Some(ref path) = cli.instructions {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instructions from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .cache_dir(cli.cache_dir.clone())
        .api_timeout_secs(cli.api_timeout)
        .default_currency(cli.currency.trim())
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_tokens)
        .concurrency(cli.concurrency)
        .download_timeout_secs(cli.download_timeout)
        .ocr(OcrSettings {
            tesseract_cmd: cli.tesseract_cmd.clone(),
            language: cli.lang.clone(),
            binarize: !cli.no_binarize,
            threshold: cli.threshold,
        });

    if !cli.candidates.is_empty() {
        builder = builder.candidate_models(cli.candidates.iter().map(|c| c.trim().to_string()));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model_override(model.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref base) = cli.api_base {
        builder = builder.api_base_url(base.clone());
    }
    if let Some(text) = instructions {
        builder = builder.instructions(text);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

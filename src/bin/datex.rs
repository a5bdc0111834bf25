//! CLI binary for datex.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `ModelConfig` and a `Pipeline`, runs the batch and prints the report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use datex::config::ModelConfigFile;
use datex::{
    compare_with_expected, load_schema, write_report, BatchProgressCallback, Comparison,
    ConcurrencyLimit, Dataset, ExtractionReport, ModelConfig, PdfiumRasterizer, Phase, Pipeline,
    ProgressCallback, Provider,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

/// Terminal progress callback: one bar reused for both phases, with a log
/// line per finished document. Documents finish in any order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, phase: Phase, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total_documents as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(match phase {
            Phase::Conversion => "Converting",
            Phase::Extraction => "Extracting",
        });
        self.bar.reset_eta();
    }

    fn on_document_complete(&self, _phase: Phase, path: &Path) {
        self.bar
            .println(format!("  {} {}", green("✓"), display_name(path)));
        self.bar.inc(1);
    }

    fn on_document_error(&self, _phase: Phase, path: &Path, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            display_name(path),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, phase: Phase, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        self.bar.println(format!(
            "{} {}: {}/{} documents  {}",
            mark,
            phase,
            bold(&success_count.to_string()),
            total_documents,
            if failed > 0 {
                red(&format!("({failed} failed)"))
            } else {
                String::new()
            }
        ));
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract from two PDFs with the model in ./config.json
  datex --schema invoice_schema.json a.pdf b.pdf

  # Run a dataset directory (PDFs + output_schema.json [+ expected_output.json])
  datex --dataset datasets/invoices -o runs/invoices.json

  # Local model through Ollama, no config file needed
  datex --provider ollama --model llama3.2-vision --schema schema.json doc.pdf

  # Bound concurrency for large batches
  datex --dataset big/ --max-in-flight 8 --page-concurrency 2

CONFIG FILE (config.json):
  {
    "provider": "openai",              openai | ollama
    "model_name": "gpt-4.1-mini",
    "system_prompt": "...",            optional
    "user_prompt": "...",              optional
    "temperature": 0.1,                optional, strictly between 0 and 1
    "top_p": 0.1,                      optional, strictly between 0 and 1
    "api_key": "sk-...",               optional, falls back to OPENAI_API_KEY
    "base_url": "http://host:11434"    optional endpoint override
  }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY     OpenAI API key (also read from .env)
  PDFIUM_LIB_PATH    Directory containing libpdfium
  RUST_LOG           Overrides the log filter
"#;

/// Extract structured data from PDF documents using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "datex",
    version,
    about = "Extract structured data from PDF documents using vision LLMs",
    long_about = "Rasterise every page of each PDF, send the pages to an OpenAI or Ollama \
model constrained by a JSON Schema, and collect one JSON result per document. Documents are \
processed concurrently; a failing document never aborts the batch.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process.
    #[arg(conflicts_with = "dataset")]
    inputs: Vec<PathBuf>,

    /// Dataset directory: every *.pdf inside, plus output_schema.json.
    #[arg(long, env = "DATEX_DATASET")]
    dataset: Option<PathBuf>,

    /// Model configuration file.
    #[arg(long, env = "DATEX_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Output JSON Schema. Required unless --dataset provides one.
    #[arg(long, env = "DATEX_SCHEMA")]
    schema: Option<PathBuf>,

    /// Provider override: openai or ollama.
    #[arg(long, env = "DATEX_PROVIDER")]
    provider: Option<String>,

    /// Model name override.
    #[arg(long, env = "DATEX_MODEL")]
    model: Option<String>,

    /// Write the JSON report to this file instead of stdout.
    #[arg(short, long, env = "DATEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum documents in flight per phase (0 = unbounded).
    #[arg(long, env = "DATEX_MAX_IN_FLIGHT", default_value_t = 0)]
    max_in_flight: usize,

    /// Pages encoded concurrently within one document.
    #[arg(long, env = "DATEX_PAGE_CONCURRENCY", default_value_t = 5,
          value_parser = clap::value_parser!(u16).range(1..))]
    page_concurrency: u16,

    /// Longest rendered page edge in pixels (100–10000).
    #[arg(long, env = "DATEX_MAX_PIXELS", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=10000))]
    max_pixels: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DATEX_PASSWORD")]
    password: Option<String>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "DATEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DATEX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Inputs, schema, expectations ─────────────────────────────────────
    let (inputs, schema, expected) = resolve_inputs(&cli)?;
    let config = build_model_config(&cli)?;

    // ── Rasteriser ───────────────────────────────────────────────────────
    let mut rasterizer = PdfiumRasterizer::from_env().with_max_rendered_pixels(cli.max_pixels);
    if let Some(ref dir) = cli.pdfium_lib_path {
        rasterizer = rasterizer.with_library_path(dir);
    }
    if let Some(ref password) = cli.password {
        rasterizer = rasterizer.with_password(password);
    }
    rasterizer
        .check_binding()
        .context("PDF engine is not available")?;

    // ── Pipeline ─────────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let mut builder = Pipeline::builder()
        .rasterizer(Arc::new(rasterizer))
        .page_concurrency(usize::from(cli.page_concurrency))
        .max_documents_in_flight(ConcurrencyLimit::from_count(cli.max_in_flight));
    if let Some(ref cb) = progress {
        builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
    }
    let pipeline = builder.build().context("Invalid configuration")?;

    if !cli.quiet {
        eprintln!(
            "{} {} documents  {}",
            cyan("◆"),
            bold(&inputs.len().to_string()),
            dim(&format!("{} / {}", config.provider(), config.model_name()))
        );
    }

    let start = Instant::now();
    let batch = pipeline
        .run(inputs, &config, &schema)
        .await
        .context("Extraction failed")?;
    let duration_ms = start.elapsed().as_millis() as u64;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    let comparisons = expected
        .as_ref()
        .map(|expected| compare_with_expected(&batch, expected));
    let report = ExtractionReport::new(&config, batch, duration_ms);

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        write_report(output_path, &report).context("Failed to write report")?;
    } else {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }

    if !cli.quiet {
        if let Some(ref comparisons) = comparisons {
            print_comparisons(comparisons);
        }
        eprintln!(
            "{}  {}/{} documents  {}ms{}",
            if report.failed == 0 { green("✔") } else { cyan("⚠") },
            report.succeeded,
            report.total,
            report.duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

/// Collect the document paths, the schema and the optional expected answers.
fn resolve_inputs(cli: &Cli) -> Result<(Vec<PathBuf>, Value, Option<BTreeMap<String, Value>>)> {
    if let Some(ref dir) = cli.dataset {
        let dataset = Dataset::discover(dir).context("Failed to open dataset")?;
        let schema = match cli.schema {
            Some(ref path) => load_schema(path)?,
            None => dataset.load_schema()?,
        };
        let expected = dataset.load_expected()?;
        return Ok((dataset.documents, schema, expected));
    }

    if cli.inputs.is_empty() {
        bail!("No input documents: pass PDF paths or --dataset DIR");
    }
    let Some(ref schema_path) = cli.schema else {
        bail!("--schema is required when inputs are given directly");
    };
    let schema = load_schema(schema_path)?;
    Ok((cli.inputs.clone(), schema, None))
}

/// Map the config file and CLI overrides to a validated `ModelConfig`.
///
/// The config file may be absent when both `--provider` and `--model` are
/// given.
fn build_model_config(cli: &Cli) -> Result<ModelConfig> {
    let mut builder = if cli.config.exists() {
        ModelConfigFile::read(&cli.config)?.into_builder()?
    } else {
        match (&cli.provider, &cli.model) {
            (Some(provider), Some(model)) => {
                ModelConfig::builder(provider.parse::<Provider>()?, model.as_str())
            }
            _ => bail!(
                "Config file '{}' not found; pass --config or both --provider and --model",
                cli.config.display()
            ),
        }
    };

    if let Some(ref provider) = cli.provider {
        builder = builder.provider(provider.parse::<Provider>()?);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model_name(model.as_str());
    }
    builder.build().context("Invalid model configuration")
}

fn print_comparisons(comparisons: &BTreeMap<String, Comparison>) {
    let matched = comparisons.values().filter(|c| c.is_match()).count();
    eprintln!(
        "{} expected output: {}/{} match",
        cyan("◆"),
        bold(&matched.to_string()),
        comparisons.len()
    );
    for (name, comparison) in comparisons {
        let line = match comparison {
            Comparison::Match => format!("{} {}", green("="), name),
            Comparison::Mismatch { fields } if fields.is_empty() => {
                format!("{} {}  {}", red("≠"), name, dim("value differs"))
            }
            Comparison::Mismatch { fields } => {
                format!("{} {}  {}", red("≠"), name, dim(&fields.join(", ")))
            }
            Comparison::ExtractionFailed { error } => {
                format!("{} {}  {}", red("✗"), name, red(error))
            }
            Comparison::MissingResult => format!("{} {}  {}", red("?"), name, dim("no result")),
            Comparison::Unexpected => format!("{} {}  {}", dim("+"), name, dim("no expectation")),
        };
        eprintln!("  {line}");
    }
}

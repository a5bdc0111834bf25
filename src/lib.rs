//! # datex
//!
//! Extract structured data from PDF documents with vision-capable LLMs.
//!
//! Every page of every document is rasterised to PNG and sent, together
//! with a prompt and a JSON Schema, to an OpenAI or Ollama model. The
//! model's answer is parsed as JSON and recorded per document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Validate   existence, permissions, %PDF magic bytes
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     PNG → base64, page order preserved
//!  ├─ 4. Extract    one schema-constrained call per document (OpenAI / Ollama)
//!  └─ 5. Parse      answer → JSON, or a per-document error
//! ```
//!
//! Documents are processed concurrently in both phases. A failing document
//! never affects its siblings: the result always has exactly one
//! [`ExtractionOutcome`] per requested path.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datex::{load_schema, ModelConfig, Pipeline, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ollama needs no API key; OpenAI reads OPENAI_API_KEY when none is set.
//!     let config = ModelConfig::builder(Provider::Ollama, "llama3.2-vision").build()?;
//!     let schema = load_schema("output_schema.json")?;
//!     let pipeline = Pipeline::builder().build()?;
//!
//!     let results = pipeline.run(["invoice.pdf"], &config, &schema).await?;
//!     for outcome in results.values() {
//!         println!("{}", serde_json::to_string(outcome)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `datex` binary (clap, anyhow, indicatif, tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! datex = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dataset;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod run;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{env_credential, ConcurrencyLimit, ModelConfig, ModelConfigBuilder, Provider};
pub use dataset::{compare_with_expected, Comparison, Dataset};
pub use error::{DatexError, DocumentError, ExtractionError};
pub use output::{
    ConversionBatch, ConvertedDocument, ExtractionBatch, ExtractionOutcome, ExtractionReport,
    OutcomeResult, Part, PartKind,
};
pub use pipeline::convert::{ConversionCoordinator, DocumentConverter};
pub use pipeline::encode::{PageEncoder, PngBase64Encoder};
pub use pipeline::extract::ExtractionCoordinator;
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use progress::{BatchProgressCallback, NoopProgressCallback, Phase, ProgressCallback};
pub use providers::{ExtractionStrategy, OllamaStrategy, OpenAiStrategy, StrategyRegistry};
pub use run::{write_report, Pipeline, PipelineBuilder};
pub use schema::load_schema;

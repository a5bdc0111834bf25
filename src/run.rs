//! End-to-end runs: convert a batch of PDFs, extract structured data from
//! every converted document and write the report.
//!
//! [`Pipeline`] composes the two coordinators. A document that fails
//! conversion never reaches the provider; its conversion error is carried
//! into the result as an extraction outcome, so the final map always has
//! exactly one entry per requested path.

use crate::config::{ConcurrencyLimit, ModelConfig};
use crate::error::DatexError;
use crate::output::{ExtractionBatch, ExtractionOutcome, ExtractionReport};
use crate::pipeline::convert::{ConversionCoordinator, DocumentConverter, DEFAULT_PAGE_CONCURRENCY};
use crate::pipeline::encode::{PageEncoder, PngBase64Encoder};
use crate::pipeline::extract::ExtractionCoordinator;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::progress::ProgressCallback;
use crate::providers::StrategyRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A configured conversion + extraction pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    conversion: ConversionCoordinator,
    extraction: ExtractionCoordinator,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn conversion(&self) -> &ConversionCoordinator {
        &self.conversion
    }

    pub fn extraction(&self) -> &ExtractionCoordinator {
        &self.extraction
    }

    /// Convert every path, then extract from every converted document.
    ///
    /// # Errors
    /// Returns `Err` only when no strategy is registered for
    /// `config.provider()`; this is checked before any document is touched.
    /// Every per-document failure ends up in the returned map instead.
    pub async fn run<I, P>(
        &self,
        paths: I,
        config: &ModelConfig,
        output_schema: &Value,
    ) -> Result<ExtractionBatch, DatexError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let strategy = self.extraction.resolve(config)?;

        let converted = self.conversion.convert_batch(paths).await;
        let mut documents = BTreeMap::new();
        let mut carried = ExtractionBatch::new();
        for (path, result) in converted {
            match result {
                Ok(doc) => {
                    documents.insert(path, doc);
                }
                Err(e) => {
                    let outcome =
                        ExtractionOutcome::failure(path.clone(), format!("conversion failed: {e}"));
                    carried.insert(path, outcome);
                }
            }
        }
        if !carried.is_empty() {
            warn!(
                "{} documents failed conversion and are skipped for extraction",
                carried.len()
            );
        }

        let mut batch = self
            .extraction
            .extract_with(&strategy, documents, config, output_schema)
            .await;
        batch.extend(carried);

        let succeeded = batch.values().filter(|o| o.is_success()).count();
        info!("Run finished: {}/{} documents succeeded", succeeded, batch.len());
        Ok(batch)
    }
}

/// Builder for [`Pipeline`].
///
/// Every knob has a default: pdfium rasterisation configured from the
/// environment, PNG/base64 encoding, 5 pages encoded at once per document,
/// unbounded documents in flight and the built-in HTTP strategies.
#[derive(Default)]
pub struct PipelineBuilder {
    rasterizer: Option<Arc<dyn Rasterizer>>,
    encoder: Option<Arc<dyn PageEncoder>>,
    page_concurrency: Option<usize>,
    max_documents_in_flight: ConcurrencyLimit,
    strategies: Option<StrategyRegistry>,
    progress_callback: Option<ProgressCallback>,
}

impl PipelineBuilder {
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn PageEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Pages encoded concurrently within one document. Must be ≥ 1.
    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = Some(n);
        self
    }

    /// Documents in flight per phase. Applies to conversion and extraction.
    pub fn max_documents_in_flight(mut self, limit: ConcurrencyLimit) -> Self {
        self.max_documents_in_flight = limit;
        self
    }

    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    pub fn build(self) -> Result<Pipeline, DatexError> {
        let page_concurrency = self.page_concurrency.unwrap_or(DEFAULT_PAGE_CONCURRENCY);
        if page_concurrency == 0 {
            return Err(DatexError::InvalidConfig(
                "page_concurrency must be at least 1".into(),
            ));
        }

        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Arc::new(PdfiumRasterizer::from_env()));
        let encoder = self.encoder.unwrap_or_else(|| Arc::new(PngBase64Encoder));
        let strategies = self.strategies.unwrap_or_else(StrategyRegistry::with_defaults);

        let converter = DocumentConverter::new(rasterizer, encoder, page_concurrency);
        Ok(Pipeline {
            conversion: ConversionCoordinator::new(converter)
                .with_limit(self.max_documents_in_flight)
                .with_progress(self.progress_callback.clone()),
            extraction: ExtractionCoordinator::new(strategies)
                .with_limit(self.max_documents_in_flight)
                .with_progress(self.progress_callback),
        })
    }
}

/// Write `report` to `path` as pretty JSON.
///
/// Uses atomic write (temp file in the same directory + rename) so a reader
/// never sees a partial report.
pub fn write_report(path: impl AsRef<Path>, report: &ExtractionReport) -> Result<(), DatexError> {
    let path = path.as_ref();
    let write_failed = |source: std::io::Error| DatexError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_failed)?;
    serde_json::to_writer_pretty(&mut tmp, report)
        .map_err(|e| write_failed(std::io::Error::from(e)))?;
    tmp.write_all(b"\n").map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;

    info!("Report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::error::{DocumentError, ExtractionError};
    use crate::output::{OutcomeResult, Part};
    use crate::providers::ExtractionStrategy;
    use async_trait::async_trait;
    use image::{DynamicImage, RgbaImage};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PageCountRasterizer {
        pages: HashMap<PathBuf, usize>,
        calls: AtomicUsize,
    }

    impl PageCountRasterizer {
        fn new(entries: &[(&str, usize)]) -> Arc<Self> {
            Arc::new(Self {
                pages: entries.iter().map(|(p, n)| (PathBuf::from(p), *n)).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Rasterizer for PageCountRasterizer {
        fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = *self.pages.get(path).ok_or_else(|| DocumentError::FileNotFound {
                path: path.to_path_buf(),
            })?;
            Ok((0..n)
                .map(|_| DynamicImage::ImageRgba8(RgbaImage::new(2, 2)))
                .collect())
        }
    }

    /// Records how many image parts each call carried.
    struct FixedAnswer {
        provider: Provider,
        answer: &'static str,
        image_counts: std::sync::Mutex<Vec<usize>>,
    }

    impl FixedAnswer {
        fn new(provider: Provider, answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                provider,
                answer,
                image_counts: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExtractionStrategy for FixedAnswer {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn extract(
            &self,
            _config: &ModelConfig,
            parts: &[Part],
            _schema: &Value,
        ) -> Result<String, ExtractionError> {
            self.image_counts
                .lock()
                .unwrap()
                .push(parts.iter().filter(|p| p.is_image()).count());
            Ok(self.answer.to_string())
        }
    }

    fn ollama_config() -> ModelConfig {
        ModelConfig::builder(Provider::Ollama, "llava")
            .build_with(|_| None)
            .unwrap()
    }

    fn pipeline(rasterizer: Arc<PageCountRasterizer>, strategy: Arc<FixedAnswer>) -> Pipeline {
        Pipeline::builder()
            .rasterizer(rasterizer)
            .strategies(StrategyRegistry::empty().register(strategy))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn two_documents_end_to_end() {
        let rasterizer = PageCountRasterizer::new(&[("one.pdf", 2), ("two.pdf", 1)]);
        let strategy = FixedAnswer::new(Provider::Ollama, r#"{"field": "value"}"#);
        let batch = pipeline(rasterizer, strategy.clone())
            .run(["one.pdf", "two.pdf"], &ollama_config(), &json!({"type": "object"}))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        for outcome in batch.values() {
            assert_eq!(outcome.result, OutcomeResult::Data(json!({"field": "value"})));
        }
        let mut counts = strategy.image_counts.lock().unwrap().clone();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn conversion_failure_is_carried_forward() {
        let rasterizer = PageCountRasterizer::new(&[("good.pdf", 1)]);
        let strategy = FixedAnswer::new(Provider::Ollama, "{}");
        let batch = pipeline(rasterizer, strategy.clone())
            .run(["good.pdf", "missing.pdf"], &ollama_config(), &json!({}))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch[Path::new("good.pdf")].is_success());
        let err = batch[Path::new("missing.pdf")].error().unwrap();
        assert!(err.starts_with("conversion failed:"), "got: {err}");
        assert_eq!(strategy.image_counts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_provider_fails_before_conversion() {
        let rasterizer = PageCountRasterizer::new(&[("a.pdf", 1)]);
        let strategy = FixedAnswer::new(Provider::Ollama, "{}");
        let openai = ModelConfig::builder(Provider::OpenAi, "gpt-4.1-mini")
            .api_key("sk-test")
            .build_with(|_| None)
            .unwrap();

        let err = pipeline(rasterizer.clone(), strategy)
            .run(["a.pdf"], &openai, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DatexError::ProviderNotSupported { .. }));
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_documents_failing_still_returns_full_batch() {
        let rasterizer = PageCountRasterizer::new(&[]);
        let strategy = FixedAnswer::new(Provider::Ollama, "{}");
        let batch = pipeline(rasterizer, strategy)
            .run(["a.pdf", "b.pdf", "c.pdf"], &ollama_config(), &json!({}))
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.values().all(|o| !o.is_success()));
    }

    #[test]
    fn zero_page_concurrency_is_rejected() {
        let err = Pipeline::builder().page_concurrency(0).build().err().expect("must fail");
        assert!(err.is_configuration_error());
    }

    #[test]
    fn write_report_creates_parent_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("report.json");
        let mut batch = ExtractionBatch::new();
        batch.insert("a.pdf".into(), ExtractionOutcome::success("a.pdf", json!({"x": 1})));
        let report = ExtractionReport::new(&ollama_config(), batch, 7);

        write_report(&path, &report).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["provider"], "ollama");
        assert_eq!(written["total"], 1);
        assert_eq!(written["files"][0], json!({"path": "a.pdf", "data": {"x": 1}}));
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}

//! Batch extraction: send every converted document to the configured
//! provider concurrently and parse each answer as JSON.
//!
//! The strategy is resolved once per batch and shared by all documents.
//! Every document gets exactly one [`ExtractionOutcome`]: `data` when the
//! answer parses as JSON, `error` otherwise. Invocation failures and parse
//! failures carry different messages (see [`ExtractionError`]) so "the call
//! failed" can be told apart from "the model answered badly".

use crate::config::{ConcurrencyLimit, ModelConfig};
use crate::error::{DatexError, ExtractionError};
use crate::output::{ConvertedDocument, ExtractionBatch, ExtractionOutcome};
use crate::progress::{Phase, ProgressCallback};
use crate::providers::{ExtractionStrategy, StrategyRegistry};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one extraction per document and collects the outcomes.
#[derive(Clone)]
pub struct ExtractionCoordinator {
    strategies: StrategyRegistry,
    limit: ConcurrencyLimit,
    progress: Option<ProgressCallback>,
}

impl ExtractionCoordinator {
    pub fn new(strategies: StrategyRegistry) -> Self {
        Self {
            strategies,
            limit: ConcurrencyLimit::Unbounded,
            progress: None,
        }
    }

    pub fn with_limit(mut self, limit: ConcurrencyLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Resolve the strategy for `config.provider()`.
    pub fn resolve(
        &self,
        config: &ModelConfig,
    ) -> Result<Arc<dyn ExtractionStrategy>, DatexError> {
        self.strategies.resolve(config.provider())
    }

    /// Extract every document. Fails only if the provider has no strategy,
    /// before any request is sent.
    pub async fn extract_batch(
        &self,
        documents: BTreeMap<PathBuf, ConvertedDocument>,
        config: &ModelConfig,
        output_schema: &Value,
    ) -> Result<ExtractionBatch, DatexError> {
        let strategy = self.resolve(config)?;
        Ok(self
            .extract_with(&strategy, documents, config, output_schema)
            .await)
    }

    /// Extract every document with an already resolved strategy.
    pub async fn extract_with(
        &self,
        strategy: &Arc<dyn ExtractionStrategy>,
        documents: BTreeMap<PathBuf, ConvertedDocument>,
        config: &ModelConfig,
        output_schema: &Value,
    ) -> ExtractionBatch {
        let total = documents.len();
        info!(
            "Extracting {} documents with {} / {}",
            total,
            config.provider(),
            config.model_name()
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(Phase::Extraction, total);
        }

        let batch: ExtractionBatch = stream::iter(documents.into_iter().map(|(path, doc)| {
            let strategy = Arc::clone(strategy);
            let progress = self.progress.clone();
            async move {
                let start = Instant::now();
                let result =
                    extract_document(strategy.as_ref(), &doc, config, output_schema).await;
                let outcome = match result {
                    Ok(data) => {
                        debug!(
                            "{}: extracted in {}ms",
                            path.display(),
                            start.elapsed().as_millis()
                        );
                        if let Some(ref cb) = progress {
                            cb.on_document_complete(Phase::Extraction, &path);
                        }
                        ExtractionOutcome::success(path.clone(), data)
                    }
                    Err(e) => {
                        warn!("{}: {}", path.display(), e);
                        let message = e.to_string();
                        if let Some(ref cb) = progress {
                            cb.on_document_error(Phase::Extraction, &path, &message);
                        }
                        ExtractionOutcome::failure(path.clone(), message)
                    }
                };
                (path, outcome)
            }
        }))
        .buffer_unordered(self.limit.permits(total))
        .collect()
        .await;

        let succeeded = batch.values().filter(|o| o.is_success()).count();
        info!("Extracted {}/{} documents", succeeded, total);
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(Phase::Extraction, total, succeeded);
        }

        batch
    }
}

/// Call the strategy for one document and parse its answer.
async fn extract_document(
    strategy: &dyn ExtractionStrategy,
    doc: &ConvertedDocument,
    config: &ModelConfig,
    output_schema: &Value,
) -> Result<Value, ExtractionError> {
    let raw = strategy.extract(config, &doc.parts, output_schema).await?;
    parse_response(&raw)
}

/// Parse a raw model answer as JSON.
pub fn parse_response(raw: &str) -> Result<Value, ExtractionError> {
    serde_json::from_str(raw).map_err(|e| ExtractionError::InvalidJson {
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::output::{Part, PNG_MIME_TYPE};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers by the first part's content: `fail:*` errors, anything else
    /// is returned verbatim.
    struct EchoStrategy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionStrategy for EchoStrategy {
        fn provider(&self) -> Provider {
            Provider::Ollama
        }

        async fn extract(
            &self,
            _config: &ModelConfig,
            parts: &[Part],
            _schema: &Value,
        ) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = parts.first().map(Part::content).unwrap_or_default();
            match first.strip_prefix("fail:") {
                Some(reason) => Err(ExtractionError::Api {
                    provider: "ollama".into(),
                    status: 500,
                    body: reason.to_string(),
                }),
                None => Ok(first.to_string()),
            }
        }
    }

    fn doc(path: &str, answer: &str) -> (PathBuf, ConvertedDocument) {
        (
            PathBuf::from(path),
            ConvertedDocument {
                path: path.into(),
                mime_type: PNG_MIME_TYPE.into(),
                parts: vec![Part::image(answer)],
            },
        )
    }

    fn config() -> ModelConfig {
        ModelConfig::builder(Provider::Ollama, "llava")
            .build_with(|_| None)
            .unwrap()
    }

    fn coordinator() -> (ExtractionCoordinator, Arc<EchoStrategy>) {
        let strategy = Arc::new(EchoStrategy {
            calls: AtomicUsize::new(0),
        });
        let registry = StrategyRegistry::empty().register(strategy.clone());
        (ExtractionCoordinator::new(registry), strategy)
    }

    #[tokio::test]
    async fn parse_failure_is_isolated() {
        let (coordinator, _) = coordinator();
        let docs = BTreeMap::from([
            doc("x.pdf", "not-json"),
            doc("y.pdf", r#"{"field": "value"}"#),
        ]);
        let batch = coordinator
            .extract_batch(docs, &config(), &json!({"type": "object"}))
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        let x = &batch[Path::new("x.pdf")];
        assert!(x.error().unwrap().starts_with("response is not valid JSON"));
        assert!(x.data().is_none());
        assert_eq!(batch[Path::new("y.pdf")].data(), Some(&json!({"field": "value"})));
    }

    #[tokio::test]
    async fn provider_error_is_recorded_with_its_message() {
        let (coordinator, _) = coordinator();
        let docs = BTreeMap::from([doc("a.pdf", "fail:model overloaded"), doc("b.pdf", "[1, 2]")]);
        let batch = coordinator
            .extract_batch(docs, &config(), &json!({}))
            .await
            .unwrap();

        let a = batch[Path::new("a.pdf")].error().unwrap();
        assert!(a.contains("model overloaded"), "got: {a}");
        assert!(!a.contains("not valid JSON"));
        assert_eq!(batch[Path::new("b.pdf")].data(), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn empty_answer_is_a_parse_error() {
        let (coordinator, _) = coordinator();
        let docs = BTreeMap::from([doc("e.pdf", "")]);
        let batch = coordinator
            .extract_batch(docs, &config(), &json!({}))
            .await
            .unwrap();
        assert!(batch[Path::new("e.pdf")]
            .error()
            .unwrap()
            .starts_with("response is not valid JSON"));
    }

    #[tokio::test]
    async fn every_document_gets_one_outcome() {
        let (coordinator, strategy) = coordinator();
        let docs: BTreeMap<_, _> = (0..10)
            .map(|i| {
                let answer = if i % 3 == 0 {
                    "oops".to_string()
                } else {
                    format!("{{\"n\": {i}}}")
                };
                doc(&format!("{i}.pdf"), &answer)
            })
            .collect();
        let batch = coordinator
            .clone()
            .with_limit(ConcurrencyLimit::from_count(3))
            .extract_batch(docs, &config(), &json!({}))
            .await
            .unwrap();

        assert_eq!(batch.len(), 10);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 10);
        for (path, outcome) in &batch {
            assert_eq!(&outcome.path, path);
            assert!(outcome.data().is_some() ^ outcome.error().is_some());
        }
        assert_eq!(batch.values().filter(|o| o.is_success()).count(), 6);
    }

    #[tokio::test]
    async fn unsupported_provider_fails_before_any_call() {
        let (coordinator, strategy) = coordinator();
        let openai = ModelConfig::builder(Provider::OpenAi, "gpt-4.1-mini")
            .api_key("sk-test")
            .build_with(|_| None)
            .unwrap();
        let err = coordinator
            .extract_batch(BTreeMap::from([doc("a.pdf", "{}")]), &openai, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DatexError::ProviderNotSupported { .. }));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parse_response_accepts_any_json_value() {
        assert_eq!(parse_response("{\"a\": 1}").unwrap(), json!({"a": 1}));
        assert_eq!(parse_response("null").unwrap(), Value::Null);
        assert!(parse_response("not-json").unwrap_err().is_parse_error());
    }
}

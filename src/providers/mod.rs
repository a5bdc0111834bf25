//! Provider strategies: send a converted document to an LLM under a JSON
//! schema constraint and return the raw answer text.
//!
//! Every provider implements [`ExtractionStrategy`]. [`StrategyRegistry`]
//! is the dispatch table from [`Provider`] to its strategy; adding a
//! provider means adding one `Provider` variant, one strategy type and one
//! `register` call. Call sites never match on the provider.
//!
//! Strategies only *call* the model. Parsing the answer as JSON and turning
//! failures into per-document outcomes is the job of
//! [`crate::pipeline::extract::ExtractionCoordinator`].

pub mod ollama;
pub mod openai;

use crate::config::{ModelConfig, Provider};
use crate::error::{DatexError, ExtractionError};
use crate::output::Part;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use ollama::OllamaStrategy;
pub use openai::OpenAiStrategy;

/// One provider's way of running an extraction.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// The provider this strategy serves.
    fn provider(&self) -> Provider;

    /// Send the prompts and image parts, constrained by `output_schema`.
    ///
    /// Returns the model's text answer, or `""` if it produced none.
    /// Transport, HTTP and envelope failures are returned as errors.
    async fn extract(
        &self,
        config: &ModelConfig,
        parts: &[Part],
        output_schema: &Value,
    ) -> Result<String, ExtractionError>;
}

/// Dispatch table from provider to strategy. Cheap to clone.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<Provider, Arc<dyn ExtractionStrategy>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.strategies.keys().collect();
        providers.sort();
        f.debug_struct("StrategyRegistry")
            .field("providers", &providers)
            .finish()
    }
}

impl StrategyRegistry {
    /// An empty registry; every lookup fails until strategies are registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the HTTP strategies for every built-in provider.
    pub fn with_defaults() -> Self {
        let client = reqwest::Client::new();
        Self::empty()
            .register(Arc::new(OpenAiStrategy::new(client.clone())))
            .register(Arc::new(OllamaStrategy::new(client)))
    }

    /// Add or replace the strategy for its provider.
    pub fn register(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.insert(strategy.provider(), strategy);
        self
    }

    /// Look up the strategy for `provider`.
    pub fn resolve(&self, provider: Provider) -> Result<Arc<dyn ExtractionStrategy>, DatexError> {
        self.strategies
            .get(&provider)
            .cloned()
            .ok_or_else(|| DatexError::ProviderNotSupported {
                provider: provider.to_string(),
            })
    }

    pub fn supports(&self, provider: Provider) -> bool {
        self.strategies.contains_key(&provider)
    }
}

/// Parts the providers cannot send yet. Text parts have no request slot in
/// either provider and are skipped.
pub(crate) fn count_unsent_parts(parts: &[Part]) -> usize {
    parts.iter().filter(|p| !p.is_image()).count()
}

/// Turn a failed `reqwest` call into an [`ExtractionError`].
pub(crate) fn transport_error(provider: Provider, e: reqwest::Error) -> ExtractionError {
    ExtractionError::Transport {
        provider: provider.to_string(),
        detail: e.to_string(),
    }
}

/// Read the response, failing on non-success status with the body attached.
pub(crate) async fn read_success_body(
    provider: Provider,
    response: reqwest::Response,
) -> Result<String, ExtractionError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;
    if !status.is_success() {
        return Err(ExtractionError::Api {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Provider);

    #[async_trait]
    impl ExtractionStrategy for Fixed {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn extract(
            &self,
            _config: &ModelConfig,
            _parts: &[Part],
            _schema: &Value,
        ) -> Result<String, ExtractionError> {
            Ok("{}".into())
        }
    }

    #[test]
    fn defaults_dispatch_to_matching_variant() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(
            registry.resolve(Provider::Ollama).unwrap().provider(),
            Provider::Ollama
        );
        assert_eq!(
            registry.resolve(Provider::OpenAi).unwrap().provider(),
            Provider::OpenAi
        );
    }

    #[test]
    fn unregistered_provider_is_not_supported() {
        let registry = StrategyRegistry::empty().register(Arc::new(Fixed(Provider::Ollama)));
        assert!(registry.supports(Provider::Ollama));
        let err = registry.resolve(Provider::OpenAi).err().expect("must fail");
        assert!(matches!(
            err,
            DatexError::ProviderNotSupported { ref provider } if provider == "openai"
        ));
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn register_replaces_existing() {
        let registry =
            StrategyRegistry::with_defaults().register(Arc::new(Fixed(Provider::OpenAi)));
        assert_eq!(format!("{registry:?}"), "StrategyRegistry { providers: [OpenAi, Ollama] }");
    }

    #[test]
    fn counts_text_parts() {
        let parts = vec![Part::image("a"), Part::text("t"), Part::image("b")];
        assert_eq!(count_unsent_parts(&parts), 1);
    }
}

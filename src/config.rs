//! Configuration types for document extraction.
//!
//! Model behaviour is controlled through [`ModelConfig`], built via its
//! [`ModelConfigBuilder`]. Every invariant (generation parameters inside
//! (0, 1), a credential for providers that need one) is checked once in
//! [`ModelConfigBuilder::build`]; a `ModelConfig` that exists is valid, so
//! nothing downstream re-validates it per call.
//!
//! # Credential resolution
//! A missing `api_key` is filled in by a resolver function rather than by
//! reading the environment inside validation. [`ModelConfigBuilder::build`]
//! uses [`env_credential`]; tests and embedders call
//! [`ModelConfigBuilder::build_with`] with their own resolver.

use crate::error::DatexError;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

/// Environment variable consulted by [`env_credential`].
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// The LLM services a document can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI Responses API (cloud, needs an API key).
    #[serde(rename = "openai")]
    OpenAi,
    /// Local Ollama server (no credential).
    Ollama,
}

impl Provider {
    /// All known providers.
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Ollama];

    /// Providers that run without any credential.
    pub const NO_CREDENTIAL: [Provider; 1] = [Provider::Ollama];

    /// Canonical lowercase name, as used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
        }
    }

    /// Does this provider need an API key?
    pub fn requires_api_key(self) -> bool {
        !Self::NO_CREDENTIAL.contains(&self)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DatexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            other => Err(DatexError::ProviderNotSupported {
                provider: other.to_string(),
            }),
        }
    }
}

/// Resolve a credential from the process environment.
///
/// Only [`Provider::OpenAi`] has an environment fallback (`OPENAI_API_KEY`).
pub fn env_credential(provider: Provider) -> Option<String> {
    match provider {
        Provider::OpenAi => std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty()),
        Provider::Ollama => None,
    }
}

/// Provider binding and generation parameters for one run.
///
/// Fields are read through accessors so the construction-time invariants
/// cannot be broken after [`ModelConfigBuilder::build`].
#[derive(Clone)]
pub struct ModelConfig {
    provider: Provider,
    model_name: String,
    system_prompt: String,
    user_prompt: String,
    temperature: f64,
    top_p: f64,
    api_key: String,
    base_url: Option<String>,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("api_key", &if self.api_key.is_empty() { "<none>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ModelConfig {
    /// Start building a config for `provider` and `model_name`.
    pub fn builder(provider: Provider, model_name: impl Into<String>) -> ModelConfigBuilder {
        ModelConfigBuilder {
            provider,
            model_name: model_name.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt: DEFAULT_USER_PROMPT.to_string(),
            temperature: 0.1,
            top_p: 0.1,
            api_key: None,
            base_url: None,
        }
    }

    /// Load and validate a JSON config file.
    ///
    /// Recognised fields: `provider`, `model_name`, `system_prompt`,
    /// `user_prompt`, `temperature`, `top_p`, `api_key` (optional),
    /// `base_url` (optional).
    pub fn load(
        path: impl AsRef<Path>,
        resolve: impl Fn(Provider) -> Option<String>,
    ) -> Result<Self, DatexError> {
        ModelConfigFile::read(path)?
            .into_builder()?
            .build_with(resolve)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn top_p(&self) -> f64 {
        self.top_p
    }

    /// The credential; empty for providers in [`Provider::NO_CREDENTIAL`].
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Endpoint override; `None` means the strategy's default endpoint.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// Builder for [`ModelConfig`].
#[derive(Clone)]
pub struct ModelConfigBuilder {
    provider: Provider,
    model_name: String,
    system_prompt: String,
    user_prompt: String,
    temperature: f64,
    top_p: f64,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl ModelConfigBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = prompt.into();
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.top_p = p;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Build, falling back to [`env_credential`] for a missing key.
    pub fn build(self) -> Result<ModelConfig, DatexError> {
        self.build_with(env_credential)
    }

    /// Build, falling back to `resolve` for a missing key.
    ///
    /// The resolver is only consulted when the provider needs a key and none
    /// was set explicitly.
    pub fn build_with(
        self,
        resolve: impl Fn(Provider) -> Option<String>,
    ) -> Result<ModelConfig, DatexError> {
        if self.model_name.trim().is_empty() {
            return Err(DatexError::InvalidConfig("model_name must not be empty".into()));
        }
        check_unit_interval("temperature", self.temperature)?;
        check_unit_interval("top_p", self.top_p)?;

        let explicit = self.api_key.filter(|k| !k.trim().is_empty());
        let api_key = if self.provider.requires_api_key() {
            explicit
                .or_else(|| resolve(self.provider))
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| DatexError::MissingApiKey {
                    provider: self.provider.to_string(),
                })?
        } else {
            explicit.unwrap_or_default()
        };

        Ok(ModelConfig {
            provider: self.provider,
            model_name: self.model_name,
            system_prompt: self.system_prompt,
            user_prompt: self.user_prompt,
            temperature: self.temperature,
            top_p: self.top_p,
            api_key,
            base_url: self.base_url.filter(|u| !u.trim().is_empty()),
        })
    }
}

/// Reject values outside the open interval (0, 1), NaN included.
fn check_unit_interval(name: &'static str, value: f64) -> Result<(), DatexError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(DatexError::ParameterOutOfRange { name, value })
    }
}

/// On-disk shape of a model config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigFile {
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ModelConfigFile {
    /// Read the file without validating values.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, DatexError> {
        let path = path.as_ref();
        let load_failed = |detail: String| DatexError::ConfigLoad {
            path: path.to_path_buf(),
            detail,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| load_failed(e.to_string()))
    }

    /// Convert into a builder; fails only on an unknown provider.
    pub fn into_builder(self) -> Result<ModelConfigBuilder, DatexError> {
        let provider: Provider = self.provider.parse()?;
        let mut builder = ModelConfig::builder(provider, self.model_name);
        if let Some(p) = self.system_prompt {
            builder = builder.system_prompt(p);
        }
        if let Some(p) = self.user_prompt {
            builder = builder.user_prompt(p);
        }
        if let Some(t) = self.temperature {
            builder = builder.temperature(t);
        }
        if let Some(p) = self.top_p {
            builder = builder.top_p(p);
        }
        if let Some(k) = self.api_key {
            builder = builder.api_key(k);
        }
        if let Some(u) = self.base_url {
            builder = builder.base_url(u);
        }
        Ok(builder)
    }
}

/// How many per-document tasks may be in flight at once.
///
/// `Unbounded` launches one task per document immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyLimit {
    #[default]
    Unbounded,
    Max(NonZeroUsize),
}

impl ConcurrencyLimit {
    /// `0` maps to `Unbounded`.
    pub fn from_count(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(ConcurrencyLimit::Unbounded, ConcurrencyLimit::Max)
    }

    /// Number of permits to use for a batch of `tasks` documents (always ≥ 1).
    pub fn permits(self, tasks: usize) -> usize {
        let tasks = tasks.max(1);
        match self {
            ConcurrencyLimit::Unbounded => tasks,
            ConcurrencyLimit::Max(n) => n.get().min(tasks),
        }
    }
}

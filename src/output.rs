//! Output types: converted content parts, per-document outcomes, batch maps
//! and the run report.

use crate::config::{ModelConfig, Provider};
use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// MIME type of the parts produced by the PNG page encoder.
pub const PNG_MIME_TYPE: &str = "image/png";

/// How a [`Part`]'s `content` must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    /// Base64-encoded image bytes.
    Image,
    /// Raw text. Produced by no converter yet and ignored by both providers.
    Text,
}

/// One typed unit of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    kind: PartKind,
    content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
}

impl Part {
    /// An image part holding base64-encoded image bytes.
    pub fn image(base64: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Image,
            content: base64.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: PartKind::Text,
            content: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn is_image(&self) -> bool {
        self.kind == PartKind::Image
    }

    /// MIME type of an image part, from its `mime_type` metadata entry.
    /// Parts built without one are PNG.
    pub fn image_mime_type(&self) -> &str {
        self.metadata
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or(PNG_MIME_TYPE)
    }
}

/// The result of converting one input file. Parts are in page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    pub path: PathBuf,
    pub mime_type: String,
    pub parts: Vec<Part>,
}

impl ConvertedDocument {
    /// Iterate over the base64 payloads of image parts, in page order.
    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter(|p| p.is_image())
            .map(Part::content)
    }
}

/// Per-document conversion results, one entry per requested path.
pub type ConversionBatch = BTreeMap<PathBuf, Result<ConvertedDocument, DocumentError>>;

/// Per-document extraction outcomes, one entry per requested path.
pub type ExtractionBatch = BTreeMap<PathBuf, ExtractionOutcome>;

/// Exactly one of `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeResult {
    Data(Value),
    Error(String),
}

/// The final result for one document.
///
/// Serialises as `{"path": …, "data": …}` or `{"path": …, "error": …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub result: OutcomeResult,
}

impl ExtractionOutcome {
    pub fn success(path: impl Into<PathBuf>, data: Value) -> Self {
        Self {
            path: path.into(),
            result: OutcomeResult::Data(data),
        }
    }

    pub fn failure(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            result: OutcomeResult::Error(error.into()),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.result {
            OutcomeResult::Data(v) => Some(v),
            OutcomeResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            OutcomeResult::Data(_) => None,
            OutcomeResult::Error(e) => Some(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Data(_))
    }
}

/// A serialisable record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub provider: Provider,
    pub model_name: String,
    pub duration_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files: Vec<ExtractionOutcome>,
}

impl ExtractionReport {
    /// Summarise a finished batch.
    pub fn new(config: &ModelConfig, batch: ExtractionBatch, duration_ms: u64) -> Self {
        let files: Vec<ExtractionOutcome> = batch.into_values().collect();
        let succeeded = files.iter().filter(|o| o.is_success()).count();
        Self {
            provider: config.provider(),
            model_name: config.model_name().to_string(),
            duration_ms,
            total: files.len(),
            succeeded,
            failed: files.len() - succeeded,
            files,
        }
    }
}

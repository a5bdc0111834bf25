//! Dataset directories and expected-output comparison.
//!
//! A dataset is a directory holding the PDFs to process, the output schema
//! and, optionally, the expected answers:
//!
//! ```text
//! invoices/
//! ├── 0001.pdf
//! ├── 0002.pdf
//! ├── output_schema.json
//! └── expected_output.json   { "0001.pdf": {...}, "0002.pdf": {...} }
//! ```
//!
//! Expected answers are keyed by file name, not by full path, so a dataset
//! can be moved without rewriting them.

use crate::error::DatexError;
use crate::output::{ExtractionBatch, OutcomeResult};
use crate::pipeline::input::has_pdf_extension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the output schema inside a dataset.
pub const OUTPUT_SCHEMA_FILE: &str = "output_schema.json";

/// File name of the expected answers inside a dataset.
pub const EXPECTED_OUTPUT_FILE: &str = "expected_output.json";

/// Expected answer per document file name.
pub type ExpectedOutput = BTreeMap<String, Value>;

/// The files that make up one dataset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub root: PathBuf,
    /// PDFs directly inside `root`, sorted by path.
    pub documents: Vec<PathBuf>,
    /// Location of the output schema. May not exist yet.
    pub schema_path: PathBuf,
    /// Location of the expected answers, if the file exists.
    pub expected_path: Option<PathBuf>,
}

impl Dataset {
    /// Scan `dir` for PDFs. Subdirectories are not searched.
    ///
    /// # Errors
    /// `DatasetNotFound` if `dir` is not a directory, `NoDocuments` if it
    /// holds no PDF.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, DatexError> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DatexError::DatasetNotFound { path: root });
        }

        let entries = std::fs::read_dir(&root).map_err(|_| DatexError::DatasetNotFound {
            path: root.clone(),
        })?;
        let mut documents: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && has_pdf_extension(p))
            .collect();
        documents.sort();

        if documents.is_empty() {
            return Err(DatexError::NoDocuments { path: root });
        }

        let expected = root.join(EXPECTED_OUTPUT_FILE);
        let dataset = Self {
            schema_path: root.join(OUTPUT_SCHEMA_FILE),
            expected_path: expected.is_file().then_some(expected),
            documents,
            root,
        };
        info!(
            "Dataset {}: {} documents, expected output {}",
            dataset.root.display(),
            dataset.documents.len(),
            if dataset.expected_path.is_some() { "present" } else { "absent" }
        );
        Ok(dataset)
    }

    /// Load the dataset's output schema.
    pub fn load_schema(&self) -> Result<Value, DatexError> {
        crate::schema::load_schema(&self.schema_path)
    }

    /// Load the expected answers, `None` when the dataset has none.
    pub fn load_expected(&self) -> Result<Option<ExpectedOutput>, DatexError> {
        let Some(path) = &self.expected_path else {
            return Ok(None);
        };
        let load_failed = |detail: String| DatexError::ExpectedOutputLoad {
            path: path.clone(),
            detail,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
        let expected: ExpectedOutput =
            serde_json::from_str(&text).map_err(|e| load_failed(e.to_string()))?;
        debug!("Loaded {} expected answers", expected.len());
        Ok(Some(expected))
    }
}

/// How one document's result compares with its expected answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Comparison {
    /// Extracted data equals the expected answer.
    Match,
    /// Extracted data differs. `fields` lists the differing top-level keys;
    /// empty when either side is not an object.
    Mismatch { fields: Vec<String> },
    /// Extraction failed for a document that has an expected answer.
    ExtractionFailed { error: String },
    /// An expected answer has no result in the batch.
    MissingResult,
    /// A result has no expected answer.
    Unexpected,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }
}

/// Compare every result and every expectation, keyed by file name.
pub fn compare_with_expected(
    batch: &ExtractionBatch,
    expected: &ExpectedOutput,
) -> BTreeMap<String, Comparison> {
    let results: BTreeMap<String, &OutcomeResult> = batch
        .iter()
        .map(|(path, outcome)| (file_key(path), &outcome.result))
        .collect();

    let names: BTreeSet<&String> = results.keys().chain(expected.keys()).collect();
    names
        .into_iter()
        .map(|name| {
            let comparison = match (results.get(name), expected.get(name)) {
                (Some(_), None) => Comparison::Unexpected,
                (None, _) => Comparison::MissingResult,
                (Some(OutcomeResult::Error(e)), Some(_)) => Comparison::ExtractionFailed {
                    error: e.clone(),
                },
                (Some(OutcomeResult::Data(actual)), Some(want)) => compare_values(actual, want),
            };
            (name.clone(), comparison)
        })
        .collect()
}

fn compare_values(actual: &Value, expected: &Value) -> Comparison {
    if actual == expected {
        return Comparison::Match;
    }
    let fields = match (actual.as_object(), expected.as_object()) {
        (Some(a), Some(e)) => {
            let keys: BTreeSet<&String> = a.keys().chain(e.keys()).collect();
            keys.into_iter()
                .filter(|k| a.get(*k) != e.get(*k))
                .cloned()
                .collect()
        }
        _ => Vec::new(),
    };
    Comparison::Mismatch { fields }
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

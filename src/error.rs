//! Error types for the datex library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`DatexError`]: **fatal**. The run cannot start or cannot finish
//!   (invalid model configuration, unsupported provider, unreadable schema,
//!   report cannot be written). Returned as `Err(DatexError)`.
//!
//! * [`DocumentError`]: **per document, conversion phase**. One PDF could not
//!   be rasterised or encoded. Recorded in the conversion batch under that
//!   document's path; sibling documents are unaffected.
//!
//! * [`ExtractionError`]: **per document, extraction phase**. The provider
//!   call failed, or it succeeded but returned something that is not JSON.
//!   Recorded as the document's outcome error.
//!
//! Per-document errors never unwind past the coordinator that produced them.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the datex library.
#[derive(Debug, Error)]
pub enum DatexError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A generation parameter lies outside the open interval (0, 1).
    #[error("Invalid configuration: {name} must lie strictly between 0 and 1, got {value}")]
    ParameterOutOfRange { name: &'static str, value: f64 },

    /// The provider needs a credential and none was given or resolved.
    #[error(
        "Provider '{provider}' requires an API key.\n\
Set `api_key` in the config file or export OPENAI_API_KEY."
    )]
    MissingApiKey { provider: String },

    /// No extraction strategy is registered for this provider.
    #[error("Provider '{provider}' is not supported")]
    ProviderNotSupported { provider: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The model configuration file could not be read or parsed.
    #[error("Failed to load config '{path}': {detail}")]
    ConfigLoad { path: PathBuf, detail: String },

    /// The output schema could not be read, parsed, or is not an object.
    #[error("Failed to load output schema '{path}': {detail}")]
    SchemaLoad { path: PathBuf, detail: String },

    /// The dataset's expected output could not be read or parsed.
    #[error("Failed to load expected output '{path}': {detail}")]
    ExpectedOutputLoad { path: PathBuf, detail: String },

    /// Dataset directory does not exist or is not a directory.
    #[error("Dataset directory not found: '{path}'")]
    DatasetNotFound { path: PathBuf },

    /// Dataset directory holds no PDF files.
    #[error("No PDF documents found in '{path}'")]
    NoDocuments { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the report file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the binary, install it system-wide,\n\
or set PDFIUM_LIB_PATH to the directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DatexError {
    /// Is this a configuration error (detected before any batch work)?
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DatexError::InvalidConfig(_)
                | DatexError::ParameterOutOfRange { .. }
                | DatexError::MissingApiKey { .. }
                | DatexError::ProviderNotSupported { .. }
        )
    }
}

/// A conversion failure scoped to a single document.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A rendered page could not be PNG-encoded.
    #[error("Encoding failed for page {page}: {detail}")]
    EncodingFailed { page: usize, detail: String },

    /// The pdfium library could not be bound for this conversion.
    #[error("pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),

    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// An extraction failure scoped to a single document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The request never produced an HTTP response (connect, TLS, body read).
    #[error("{provider} request failed: {detail}")]
    Transport { provider: String, detail: String },

    /// The provider answered with a non-success status.
    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// The provider's envelope could not be decoded.
    #[error("{provider} returned an unreadable response: {detail}")]
    MalformedResponse { provider: String, detail: String },

    /// The model ran but its answer is not valid JSON.
    #[error("response is not valid JSON: {detail}")]
    InvalidJson { detail: String },
}

impl ExtractionError {
    /// `true` when the call succeeded but the answer could not be parsed.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ExtractionError::InvalidJson { .. })
    }
}

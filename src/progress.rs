//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::run::PipelineBuilder::progress_callback`] to receive events as
//! each document finishes a phase.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a progress bar, a log, or a channel of
//! their own without the library knowing how the host application
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use datex::{BatchProgressCallback, Phase};
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_document_error(&self, _phase: Phase, path: &Path, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}: {error}", path.display());
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Which coordinator is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Conversion,
    Extraction,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Conversion => f.write_str("conversion"),
            Phase::Extraction => f.write_str("extraction"),
        }
    }
}

/// Called by the coordinators as documents complete.
///
/// Documents run concurrently, so every method may be called from several
/// tasks at once; implementations must synchronise their own state.
/// All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document of the phase starts.
    fn on_batch_start(&self, phase: Phase, total_documents: usize) {
        let _ = (phase, total_documents);
    }

    /// Called when a document finishes the phase successfully.
    fn on_document_complete(&self, phase: Phase, path: &Path) {
        let _ = (phase, path);
    }

    /// Called when a document fails the phase.
    fn on_document_error(&self, phase: Phase, path: &Path, error: &str) {
        let _ = (phase, path, error);
    }

    /// Called once after every document of the phase has been attempted.
    fn on_batch_complete(&self, phase: Phase, total_documents: usize, success_count: usize) {
        let _ = (phase, total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Shared callback handle, as stored by the coordinators.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

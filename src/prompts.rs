//! Default prompts for schema-guided document extraction.
//!
//! Callers normally supply both prompts through the config file; these
//! constants are used by [`crate::config::ModelConfig::builder`] when they
//! don't. The output shape is not described here: it is enforced by the
//! JSON schema that every provider request carries.

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "The Assistant is Datex, an AI assistant to extract data from documents.";

/// Default user prompt, sent together with the page images.
pub const DEFAULT_USER_PROMPT: &str = "Extract the information from this document. \
If a value is not present, provide null. Dates should be in the format YYYY-MM.";

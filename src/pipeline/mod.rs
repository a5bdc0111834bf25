//! Pipeline stages for PDF-to-structured-data extraction.
//!
//! Each submodule implements one step. Rasterising, encoding and the model
//! call sit behind traits so each stage can be tested with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ convert ──▶ extract
//! (path)    (pdfium)   (base64)   (parts)     (provider + JSON parse)
//! ```
//!
//! 1. [`input`]: check the path is a readable PDF before pdfium sees it
//! 2. [`render`]: rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]: PNG-encode and base64-wrap each `DynamicImage`
//! 4. [`convert`]: per-document page fan-out and per-batch document fan-out
//! 5. [`extract`]: one provider call per document, answers parsed as JSON

pub mod convert;
pub mod encode;
pub mod extract;
pub mod input;
pub mod render;

//! PDF rasterisation: render every page of a document to `DynamicImage`.
//!
//! ## Why a trait?
//!
//! The converter only needs "ordered list of page images for path P".
//! [`Rasterizer`] is that contract; [`PdfiumRasterizer`] is the production
//! implementation and tests substitute in-memory rasterisers.
//!
//! ## Why blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which uses thread-local
//! state and is not safe to call from async contexts. Rasterisers are
//! therefore synchronous and the converter runs them inside
//! `tokio::task::spawn_blocking`.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and the request
//! body well under provider upload limits.

use crate::error::{DatexError, DocumentError};
use crate::pipeline::input::validate_pdf;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a directory that contains libpdfium.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Turns a document path into its pages, in page order.
pub trait Rasterizer: Send + Sync {
    /// Render every page of `path`. Called from a blocking thread.
    fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, DocumentError>;
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
    /// User password for encrypted documents.
    pub password: Option<String>,
    /// Directory holding the pdfium shared library. `None` tries the
    /// current directory, then the system library.
    pub library_path: Option<PathBuf>,
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            password: None,
            library_path: None,
        }
    }
}

impl PdfiumRasterizer {
    /// Default settings, with `library_path` taken from `PDFIUM_LIB_PATH`.
    pub fn from_env() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_max_rendered_pixels(mut self, px: u32) -> Self {
        self.max_rendered_pixels = px.max(100);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_path = Some(dir.into());
        self
    }

    /// Bind pdfium once up front so a missing library fails the run
    /// instead of every document.
    pub fn check_binding(&self) -> Result<(), DatexError> {
        self.bind().map(|_| ()).map_err(DatexError::PdfiumBindingFailed)
    }

    fn bind(&self) -> Result<Pdfium, String> {
        let bindings = match &self.library_path {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| format!("{:?}", e))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
        validate_pdf(pdf_path)?;

        let pdfium = self.bind().map_err(DocumentError::PdfiumUnavailable)?;
        let password = self.password.as_deref();

        let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    DocumentError::WrongPassword {
                        path: pdf_path.to_path_buf(),
                    }
                } else {
                    DocumentError::PasswordRequired {
                        path: pdf_path.to_path_buf(),
                    }
                }
            } else {
                DocumentError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: err_str,
                }
            }
        })?;

        let pages = document.pages();
        info!("PDF loaded: {} ({} pages)", pdf_path.display(), pages.len());

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut results = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DocumentError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            results.push(image);
        }

        Ok(results)
    }
}

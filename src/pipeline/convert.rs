//! Document conversion: PDF path → ordered image [`Part`]s, one document at
//! a time ([`DocumentConverter`]) or a whole batch ([`ConversionCoordinator`]).
//!
//! ## Two levels of concurrency
//!
//! * **Pages**: inside one document, page encoding runs on the blocking
//!   pool with at most `page_concurrency` pages in flight. Results are
//!   collected with `buffered`, which yields in input order, so a page that
//!   finishes early never jumps ahead of its predecessors.
//! * **Documents**: the coordinator runs one conversion per document,
//!   bounded only by its [`ConcurrencyLimit`] (unbounded by default).
//!
//! A failing document is recorded under its own path and never cancels a
//! sibling; `convert_batch` returns once every document has been attempted.

use crate::config::ConcurrencyLimit;
use crate::error::DocumentError;
use crate::output::{ConversionBatch, ConvertedDocument, Part};
use crate::pipeline::encode::PageEncoder;
use crate::pipeline::render::Rasterizer;
use crate::progress::{Phase, ProgressCallback};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default number of pages encoded concurrently within one document.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 5;

/// Converts one document into image parts.
#[derive(Clone)]
pub struct DocumentConverter {
    rasterizer: Arc<dyn Rasterizer>,
    encoder: Arc<dyn PageEncoder>,
    page_concurrency: usize,
}

impl DocumentConverter {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        encoder: Arc<dyn PageEncoder>,
        page_concurrency: usize,
    ) -> Self {
        Self {
            rasterizer,
            encoder,
            page_concurrency: page_concurrency.max(1),
        }
    }

    /// Rasterise `path` and encode each page, preserving page order.
    pub async fn convert(&self, path: &Path) -> Result<ConvertedDocument, DocumentError> {
        let start = Instant::now();
        let rasterizer = Arc::clone(&self.rasterizer);
        let owned_path = path.to_path_buf();

        let pages = tokio::task::spawn_blocking(move || rasterizer.rasterize(&owned_path))
            .await
            .map_err(|e| DocumentError::Internal(format!("Render task panicked: {}", e)))??;
        debug!("{}: rasterised {} pages", path.display(), pages.len());

        let mime_type = self.encoder.mime_type();
        let parts: Vec<Part> = stream::iter(pages.into_iter().enumerate().map(|(idx, page)| {
            let encoder = Arc::clone(&self.encoder);
            async move {
                let page_num = idx + 1;
                let encoded = tokio::task::spawn_blocking(move || encoder.encode(&page))
                    .await
                    .map_err(|e| {
                        DocumentError::Internal(format!("Encode task panicked: {}", e))
                    })?
                    .map_err(|e| DocumentError::EncodingFailed {
                        page: page_num,
                        detail: e.to_string(),
                    })?;
                Ok::<_, DocumentError>(
                    Part::image(encoded)
                        .with_metadata("page", page_num)
                        .with_metadata("mime_type", mime_type),
                )
            }
        }))
        .buffered(self.page_concurrency)
        .try_collect()
        .await?;

        debug!(
            "{}: encoded {} pages in {}ms",
            path.display(),
            parts.len(),
            start.elapsed().as_millis()
        );

        Ok(ConvertedDocument {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            parts,
        })
    }
}

/// Converts a batch of documents concurrently, isolating failures.
#[derive(Clone)]
pub struct ConversionCoordinator {
    converter: DocumentConverter,
    limit: ConcurrencyLimit,
    progress: Option<ProgressCallback>,
}

impl ConversionCoordinator {
    pub fn new(converter: DocumentConverter) -> Self {
        Self {
            converter,
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

    /// Convert every distinct path; the result has exactly one entry per path.
    pub async fn convert_batch<I, P>(&self, paths: I) -> ConversionBatch
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: BTreeSet<PathBuf> = paths.into_iter().map(Into::into).collect();
        let total = paths.len();
        info!("Converting {} documents", total);
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(Phase::Conversion, total);
        }

        let batch: ConversionBatch = stream::iter(paths.into_iter().map(|path| {
            let converter = self.converter.clone();
            let progress = self.progress.clone();
            async move {
                let result = converter.convert(&path).await;
                match &result {
                    Ok(doc) => {
                        debug!("{}: converted ({} parts)", path.display(), doc.parts.len());
                        if let Some(ref cb) = progress {
                            cb.on_document_complete(Phase::Conversion, &path);
                        }
                    }
                    Err(e) => {
                        warn!("{}: conversion failed: {}", path.display(), e);
                        if let Some(ref cb) = progress {
                            cb.on_document_error(Phase::Conversion, &path, &e.to_string());
                        }
                    }
                }
                (path, result)
            }
        }))
        .buffer_unordered(self.limit.permits(total))
        .collect()
        .await;

        let succeeded = batch.values().filter(|r| r.is_ok()).count();
        info!("Converted {}/{} documents", succeeded, total);
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(Phase::Conversion, total, succeeded);
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::PngBase64Encoder;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Yields `n` pages per known path; page `i` (1-based) is `i` px wide.
    struct FakeRasterizer {
        pages: HashMap<PathBuf, usize>,
    }

    impl FakeRasterizer {
        fn new(entries: &[(&str, usize)]) -> Self {
            Self {
                pages: entries.iter().map(|(p, n)| (PathBuf::from(p), *n)).collect(),
            }
        }
    }

    impl Rasterizer for FakeRasterizer {
        fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
            let n = *self.pages.get(path).ok_or_else(|| DocumentError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "unreadable".into(),
            })?;
            Ok((1..=n as u32)
                .map(|w| DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, 1, Rgba([0; 4]))))
                .collect())
        }
    }

    /// Earlier pages sleep longer, so they complete last.
    struct SlowFirstEncoder {
        total: u32,
    }

    impl PageEncoder for SlowFirstEncoder {
        fn encode(&self, page: &DynamicImage) -> Result<String, image::ImageError> {
            let delay = (self.total + 1 - page.width()) as u64 * 30;
            std::thread::sleep(Duration::from_millis(delay));
            Ok(format!("page-{}", page.width()))
        }
    }

    struct WidthEncoder;

    impl PageEncoder for WidthEncoder {
        fn encode(&self, page: &DynamicImage) -> Result<String, image::ImageError> {
            Ok(format!("page-{}", page.width()))
        }
    }

    fn converter(rasterizer: impl Rasterizer + 'static) -> DocumentConverter {
        DocumentConverter::new(Arc::new(rasterizer), Arc::new(WidthEncoder), 4)
    }

    #[tokio::test]
    async fn page_order_survives_out_of_order_encoding() {
        let converter = DocumentConverter::new(
            Arc::new(FakeRasterizer::new(&[("doc.pdf", 3)])),
            Arc::new(SlowFirstEncoder { total: 3 }),
            3,
        );
        let doc = converter.convert(Path::new("doc.pdf")).await.unwrap();
        let contents: Vec<&str> = doc.parts.iter().map(Part::content).collect();
        assert_eq!(contents, vec!["page-1", "page-2", "page-3"]);
        assert!(doc.parts.iter().all(Part::is_image));
    }

    #[tokio::test]
    async fn parts_carry_page_numbers_and_mime() {
        let converter = DocumentConverter::new(
            Arc::new(FakeRasterizer::new(&[("doc.pdf", 2)])),
            Arc::new(PngBase64Encoder),
            2,
        );
        let doc = converter.convert(Path::new("doc.pdf")).await.unwrap();
        assert_eq!(doc.mime_type, "image/png");
        assert_eq!(doc.parts[0].metadata()["page"], serde_json::json!(1));
        assert_eq!(doc.parts[1].metadata()["page"], serde_json::json!(2));
        assert_eq!(doc.parts[0].image_mime_type(), "image/png");
    }

    #[tokio::test]
    async fn parts_follow_encoder_mime_type() {
        struct JpegLabelEncoder;
        impl PageEncoder for JpegLabelEncoder {
            fn encode(&self, _page: &DynamicImage) -> Result<String, image::ImageError> {
                Ok("jpeg-bytes".into())
            }
            fn mime_type(&self) -> &'static str {
                "image/jpeg"
            }
        }

        let converter = DocumentConverter::new(
            Arc::new(FakeRasterizer::new(&[("doc.pdf", 2)])),
            Arc::new(JpegLabelEncoder),
            2,
        );
        let doc = converter.convert(Path::new("doc.pdf")).await.unwrap();
        assert_eq!(doc.mime_type, "image/jpeg");
        assert!(doc.parts.iter().all(|p| p.image_mime_type() == "image/jpeg"));
    }

    #[tokio::test]
    async fn encoding_error_fails_document() {
        struct FailingEncoder;
        impl PageEncoder for FailingEncoder {
            fn encode(&self, page: &DynamicImage) -> Result<String, image::ImageError> {
                if page.width() == 2 {
                    Err(image::ImageError::Unsupported(
                        image::error::UnsupportedError::from_format_and_kind(
                            image::error::ImageFormatHint::Unknown,
                            image::error::UnsupportedErrorKind::GenericFeature("test".into()),
                        ),
                    ))
                } else {
                    Ok("ok".into())
                }
            }
        }

        let converter = DocumentConverter::new(
            Arc::new(FakeRasterizer::new(&[("doc.pdf", 3)])),
            Arc::new(FailingEncoder),
            3,
        );
        let err = converter.convert(Path::new("doc.pdf")).await.unwrap_err();
        assert!(matches!(err, DocumentError::EncodingFailed { page: 2, .. }), "got: {err}");
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let coordinator =
            ConversionCoordinator::new(converter(FakeRasterizer::new(&[("b.pdf", 2)])));
        let batch = coordinator.convert_batch(["a.pdf", "b.pdf"]).await;

        assert_eq!(batch.len(), 2);
        assert!(matches!(
            batch[Path::new("a.pdf")],
            Err(DocumentError::CorruptPdf { .. })
        ));
        let b = batch[Path::new("b.pdf")].as_ref().expect("b converts");
        assert_eq!(b.parts.len(), 2);
        assert_eq!(b.path, PathBuf::from("b.pdf"));
    }

    #[tokio::test]
    async fn batch_has_one_entry_per_distinct_path() {
        let coordinator = ConversionCoordinator::new(converter(FakeRasterizer::new(&[
            ("a.pdf", 1),
            ("c.pdf", 1),
        ])));
        let batch = coordinator
            .convert_batch(["a.pdf", "b.pdf", "c.pdf", "a.pdf", "d.pdf"])
            .await;
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.values().filter(|r| r.is_ok()).count(), 2);
    }

    #[tokio::test]
    async fn empty_batch() {
        let coordinator = ConversionCoordinator::new(converter(FakeRasterizer::new(&[])));
        let batch = coordinator.convert_batch(Vec::<PathBuf>::new()).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn limit_bounds_documents_in_flight() {
        struct CountingRasterizer {
            current: AtomicUsize,
            peak: AtomicUsize,
        }
        impl Rasterizer for CountingRasterizer {
            fn rasterize(&self, _path: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![DynamicImage::ImageRgba8(RgbaImage::new(1, 1))])
            }
        }

        let rasterizer = Arc::new(CountingRasterizer {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let coordinator = ConversionCoordinator::new(DocumentConverter::new(
            rasterizer.clone(),
            Arc::new(WidthEncoder),
            1,
        ))
        .with_limit(ConcurrencyLimit::from_count(2));

        let paths: Vec<String> = (0..6).map(|i| format!("{i}.pdf")).collect();
        let batch = coordinator.convert_batch(paths).await;

        assert_eq!(batch.len(), 6);
        assert!(rasterizer.peak.load(Ordering::SeqCst) <= 2);
    }
}

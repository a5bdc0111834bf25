//! Page encoding: `DynamicImage` → base64 PNG string.
//!
//! Both providers accept images as base64 strings embedded in the JSON
//! request body (OpenAI as a `data:` URL, Ollama as a bare string). PNG is
//! lossless, so small print on rendered pages stays crisp for the model.

use crate::output::PNG_MIME_TYPE;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Turns one rasterised page into a transport-safe string.
///
/// Implementations must be pure: the converter calls them from several
/// blocking worker threads at once.
pub trait PageEncoder: Send + Sync {
    /// Encode one page.
    fn encode(&self, page: &DynamicImage) -> Result<String, image::ImageError>;

    /// MIME type describing the encoded payload.
    fn mime_type(&self) -> &'static str {
        PNG_MIME_TYPE
    }
}

/// The default encoder: lossless PNG, standard base64 alphabet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngBase64Encoder;

impl PageEncoder for PngBase64Encoder {
    fn encode(&self, page: &DynamicImage) -> Result<String, image::ImageError> {
        encode_page(page)
    }
}

/// Encode a rasterised page as base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = PngBase64Encoder.encode(&img).expect("encode should succeed");
        assert_eq!(PngBase64Encoder.mime_type(), "image/png");
        let decoded = STANDARD.decode(&data).expect("valid base64");
        assert_eq!(&decoded[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn encoded_png_decodes_to_same_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(7, 3, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img).unwrap();
        let bytes = STANDARD.decode(data).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (7, 3));
    }
}

//! Page image encoding for the OCR recognizers.
//!
//! Both recognizers want PNG: tesseract reads it from disk, vision models get
//! it base64-wrapped in the request body. PNG is lossless, so rendered glyph
//! edges survive intact; JPEG ringing around small text hurts recognition.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as a base64 PNG attachment for a vision model.
///
/// `detail: "high"` keeps the model from downsampling the page to a single
/// overview tile, which would lose footnotes and table cells.
pub fn image_attachment(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(png_bytes(img)?);
    debug!("Encoded {}x{} page → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])))
    }

    #[test]
    fn png_bytes_carry_png_signature() {
        let bytes = png_bytes(&blank(4, 4)).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn attachment_is_base64_png() {
        let data = image_attachment(&blank(10, 10)).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }
}

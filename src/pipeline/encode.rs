//! Image encoding: `DynamicImage` → base64 JPEG/PNG wrapped in `ImageData`.
//!
//! Vision APIs take images as base64 data embedded in the JSON request body.
//! The grader sends the same page with every question, so JPEG at quality 85
//! is the default: a 300 DPI sheet shrinks to a few hundred kilobytes and a
//! filled bubble survives the compression. PNG is available when a faint
//! pencil mark needs lossless transport.

use crate::config::ImageFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Serialise `img` to raw JPEG or PNG bytes.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode_bytes(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
    }
    Ok(buf)
}

/// Encode a rendered sheet as base64 ready for the vision API.
///
/// `detail: "high"` keeps the full tile budget on GPT-4-class models; at
/// low detail the whole sheet is squeezed into one 512 px tile and the
/// bubbles become unreadable.
pub fn encode_image(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
) -> Result<ImageData, image::ImageError> {
    let bytes = encode_bytes(img, format, quality)?;
    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} image → {} bytes base64", format, b64.len());

    Ok(ImageData::new(b64, format.mime_type()).with_detail("high"))
}

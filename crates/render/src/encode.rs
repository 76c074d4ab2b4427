//! Re-encoding edited images for saving.

use crate::error::{RenderError, RenderResult};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Default JPEG quality used when saving edited images.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encode `image` in `format`.
///
/// JPEG output drops the alpha channel and uses `jpeg_quality` (1-100).
///
/// # Errors
/// [`RenderError::UnsupportedOutput`] when `format` has no encoder.
pub fn encode(image: &DynamicImage, format: ImageFormat, jpeg_quality: u8) -> RenderResult<Vec<u8>> {
    if !format.writing_enabled() {
        return Err(RenderError::UnsupportedOutput(format!("{format:?}")));
    }

    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality.clamp(1, 100));
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
        }
        _ => image.write_to(&mut out, format)?,
    }
    Ok(out.into_inner())
}

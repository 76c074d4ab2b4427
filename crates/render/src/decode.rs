//! Decode policy shared by documents and the thumbnail pipeline.
//!
//! 1. A JPEG whose EXIF block carries a preview at least as large as the
//!    requested thumbnail uses that preview and skips the full decode.
//! 2. Otherwise the image is decoded, at a reduced scale when the codec
//!    supports it and the target is known to be much smaller.
//! 3. The EXIF orientation is applied.
//! 4. Results that were already small, or came from the embedded preview,
//!    are flagged so they are not written to the thumbnail cache.

use crate::error::{RenderError, RenderResult};
use crate::format::FormatCapabilities;
use crate::metadata::{probe, ImageMetadata};
use crate::orientation::Orientation;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use jpeg_decoder::PixelFormat;
use std::io::Cursor;
use tracing::{debug, trace};

/// Largest downscale factor used for scaled decoding.
pub const MAX_SCALE_FACTOR: u32 = 8;

/// Output size class of a decode job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeTarget {
    /// Full resolution.
    Full,
    /// Stored size divided by a power-of-two factor, for zoomed-out display.
    Reduced(u32),
    /// Fit inside a square of this many pixels.
    Thumbnail(u32),
}

/// Output of [`decode`].
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Pixels, orientation applied.
    pub image: DynamicImage,
    /// Size of the source after orientation correction.
    pub original_size: (u32, u32),
    /// Orientation that was applied.
    pub orientation: Orientation,
    /// Set when the EXIF preview was used instead of the main image.
    pub used_embedded_preview: bool,
    /// Set when a thumbnail result is worth writing to the disk cache.
    pub needs_persisting: bool,
}

/// Largest power-of-two factor, capped at [`MAX_SCALE_FACTOR`], that keeps a
/// scaled decode of `max_dimension` at or above `target`.
pub fn scale_factor_for(target: u32, max_dimension: u32) -> u32 {
    let target = target.max(1);
    let mut factor = 1;
    while factor < MAX_SCALE_FACTOR && target.saturating_mul(factor * 2) <= max_dimension {
        factor *= 2;
    }
    factor
}

/// Size of an image of `size` reduced by `factor`. `None` if a side would
/// collapse to zero.
pub fn reduced_size((width, height): (u32, u32), factor: u32) -> Option<(u32, u32)> {
    let factor = factor.max(1);
    let size = (width / factor, height / factor);
    (size.0 > 0 && size.1 > 0).then_some(size)
}

/// Decode `bytes` according to `target`.
///
/// # Errors
/// Fails on empty or corrupt data and on codec errors.
pub fn decode(bytes: &[u8], format: ImageFormat, target: DecodeTarget) -> RenderResult<DecodedImage> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyInput);
    }
    let metadata = probe(bytes, format)?;
    decode_with_metadata(bytes, format, &metadata, target)
}

/// Same as [`decode`] when the header has already been probed.
pub fn decode_with_metadata(
    bytes: &[u8],
    format: ImageFormat,
    metadata: &ImageMetadata,
    target: DecodeTarget,
) -> RenderResult<DecodedImage> {
    let orientation = metadata.orientation;
    let original_size = metadata.display_size();
    let (stored_w, stored_h) = metadata.stored_size;
    if stored_w == 0 || stored_h == 0 {
        return Err(RenderError::EmptyImage);
    }
    let capabilities = FormatCapabilities::of(format);

    if let DecodeTarget::Thumbnail(pixel_size) = target {
        if let Some(preview) = metadata
            .embedded_preview
            .as_ref()
            .filter(|preview| preview.max_dimension() >= pixel_size)
        {
            match image::load_from_memory_with_format(&preview.data, ImageFormat::Jpeg) {
                Ok(image) => {
                    let image = fit_within(image, pixel_size);
                    trace!(pixel_size, "using embedded EXIF preview");
                    return Ok(DecodedImage {
                        image: orientation.apply(&image),
                        original_size,
                        orientation,
                        used_embedded_preview: true,
                        needs_persisting: false,
                    });
                }
                Err(err) => debug!(error = %err, "embedded preview unreadable, decoding image"),
            }
        }
    }

    let factor = match target {
        DecodeTarget::Full => 1,
        DecodeTarget::Reduced(factor) => factor.clamp(1, MAX_SCALE_FACTOR),
        DecodeTarget::Thumbnail(pixel_size) => scale_factor_for(pixel_size, stored_w.max(stored_h)),
    };

    let mut image = if capabilities.scaled_decode && factor > 1 {
        decode_jpeg_scaled(bytes, (stored_w, stored_h), factor)?
    } else {
        image::load_from_memory_with_format(bytes, format)?
    };

    let mut needs_persisting = false;
    match target {
        DecodeTarget::Full => {}
        DecodeTarget::Reduced(factor) => {
            if let Some((w, h)) = reduced_size((stored_w, stored_h), factor) {
                if (image.width(), image.height()) != (w, h) {
                    image = image.resize_exact(w, h, FilterType::Triangle);
                }
            }
        }
        DecodeTarget::Thumbnail(pixel_size) => {
            if stored_w.max(stored_h) > pixel_size {
                image = fit_within(image, pixel_size);
                needs_persisting = true;
            }
        }
    }

    orientation.apply_in_place(&mut image);
    debug!(
        ?format,
        ?target,
        factor,
        width = image.width(),
        height = image.height(),
        "decoded image"
    );

    Ok(DecodedImage {
        image,
        original_size,
        orientation,
        used_embedded_preview: false,
        needs_persisting,
    })
}

/// Scale `image` down to fit a `pixel_size` square, keeping the aspect ratio.
fn fit_within(image: DynamicImage, pixel_size: u32) -> DynamicImage {
    if image.width().max(image.height()) <= pixel_size {
        image
    } else {
        image.resize(pixel_size, pixel_size, FilterType::Triangle)
    }
}

/// Decode a JPEG with the codec's scaled IDCT (1/2, 1/4 or 1/8).
///
/// Pixel layouts the native decoder does not map onto an RGB or gray buffer
/// fall back to a full decode.
fn decode_jpeg_scaled(bytes: &[u8], stored: (u32, u32), factor: u32) -> RenderResult<DynamicImage> {
    let requested_w = stored.0.div_ceil(factor).clamp(1, u32::from(u16::MAX)) as u16;
    let requested_h = stored.1.div_ceil(factor).clamp(1, u32::from(u16::MAX)) as u16;

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.read_info()?;
    let (width, height) = decoder.scale(requested_w, requested_h)?;
    let pixels = decoder.decode()?;
    let pixel_format = decoder.info().map(|info| info.pixel_format);

    let (width, height) = (u32::from(width), u32::from(height));
    let image = match pixel_format {
        Some(PixelFormat::RGB24) => {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        Some(PixelFormat::L8) => {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        _ => None,
    };

    match image {
        Some(image) => {
            trace!(factor, width, height, "scaled JPEG decode");
            Ok(image)
        }
        None => {
            debug!(?pixel_format, "scaled decode unavailable, decoding full size");
            Ok(image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::set_jpeg_orientation;
    use image::{GenericImageView, Rgb};

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_scale_factor_for() {
        assert_eq!(scale_factor_for(128, 100), 1);
        assert_eq!(scale_factor_for(128, 300), 2);
        assert_eq!(scale_factor_for(128, 512), 4);
        assert_eq!(scale_factor_for(128, 1024), 8);
        assert_eq!(scale_factor_for(128, 100_000), MAX_SCALE_FACTOR);
        assert_eq!(scale_factor_for(0, 10), 8);
    }

    #[test]
    fn test_reduced_size() {
        assert_eq!(reduced_size((400, 300), 4), Some((100, 75)));
        assert_eq!(reduced_size((1, 10_000), 4), None);
    }

    #[test]
    fn test_decode_full_png() {
        let bytes = encode(&solid(300, 200, [255, 0, 0]), ImageFormat::Png);
        let decoded = decode(&bytes, ImageFormat::Png, DecodeTarget::Full).unwrap();

        assert_eq!(decoded.image.dimensions(), (300, 200));
        assert_eq!(decoded.original_size, (300, 200));
        assert!(!decoded.needs_persisting);
    }

    #[test]
    fn test_decode_empty_input() {
        assert!(matches!(
            decode(&[], ImageFormat::Png, DecodeTarget::Full),
            Err(RenderError::EmptyInput)
        ));
    }

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let bytes = encode(&solid(300, 200, [255, 0, 0]), ImageFormat::Png);
        let decoded = decode(&bytes, ImageFormat::Png, DecodeTarget::Thumbnail(128)).unwrap();

        assert_eq!(decoded.image.width(), 128);
        assert!(decoded.image.height() <= 86 && decoded.image.height() >= 84);
        assert!(decoded.needs_persisting);
    }

    #[test]
    fn test_small_source_is_not_persisted() {
        let bytes = encode(&solid(50, 50, [0, 0, 255]), ImageFormat::Png);
        let decoded = decode(&bytes, ImageFormat::Png, DecodeTarget::Thumbnail(128)).unwrap();

        assert_eq!(decoded.image.dimensions(), (50, 50));
        assert!(!decoded.needs_persisting);
    }

    #[test]
    fn test_jpeg_scaled_decode_reduced() {
        let bytes = encode(&solid(400, 200, [10, 200, 10]), ImageFormat::Jpeg);
        let decoded = decode(&bytes, ImageFormat::Jpeg, DecodeTarget::Reduced(4)).unwrap();
        assert_eq!(decoded.image.dimensions(), (100, 50));
        assert_eq!(decoded.original_size, (400, 200));
    }

    #[test]
    fn test_jpeg_thumbnail_uses_scaled_decode() {
        let bytes = encode(&solid(1024, 512, [10, 10, 200]), ImageFormat::Jpeg);
        let decoded = decode(&bytes, ImageFormat::Jpeg, DecodeTarget::Thumbnail(128)).unwrap();
        assert_eq!(decoded.image.dimensions(), (128, 64));
        assert!(decoded.needs_persisting);
        assert!(!decoded.used_embedded_preview);
    }

    #[test]
    fn test_orientation_is_applied() {
        let jpeg = encode(&solid(40, 20, [200, 200, 200]), ImageFormat::Jpeg);
        let rotated = set_jpeg_orientation(&jpeg, Orientation::Rotate90).unwrap();

        let decoded = decode(&rotated, ImageFormat::Jpeg, DecodeTarget::Full).unwrap();
        assert_eq!(decoded.image.dimensions(), (20, 40));
        assert_eq!(decoded.original_size, (20, 40));
        assert_eq!(decoded.orientation, Orientation::Rotate90);
    }
}

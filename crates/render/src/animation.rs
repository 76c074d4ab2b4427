//! Frame extraction for animated GIF, APNG and WebP.

use crate::error::RenderResult;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, ImageFormat};
use std::io::Cursor;
use std::time::Duration;

/// One decoded animation frame.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    /// Fully composited frame.
    pub image: DynamicImage,
    /// Display time of this frame.
    pub delay: Duration,
}

/// Returns `true` if `bytes` hold more than a single still image.
///
/// Cheap for PNG and WebP, which flag animation in their headers. GIF has no
/// such flag, so the first two frames are decoded.
pub fn is_animated(bytes: &[u8], format: ImageFormat) -> bool {
    match format {
        ImageFormat::Png => PngDecoder::new(Cursor::new(bytes))
            .and_then(|decoder| decoder.is_apng())
            .unwrap_or(false),
        ImageFormat::WebP => WebPDecoder::new(Cursor::new(bytes))
            .map(|decoder| decoder.has_animation())
            .unwrap_or(false),
        ImageFormat::Gif => GifDecoder::new(Cursor::new(bytes))
            .map(|decoder| decoder.into_frames().take(2).count() > 1)
            .unwrap_or(false),
        _ => false,
    }
}

/// Decode every frame of an animation. Still images yield an empty list.
pub fn decode_frames(bytes: &[u8], format: ImageFormat) -> RenderResult<Vec<AnimationFrame>> {
    let frames = match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(bytes))?.into_frames(),
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(bytes))?;
            if !decoder.is_apng()? {
                return Ok(Vec::new());
            }
            decoder.apng()?.into_frames()
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes))?;
            if !decoder.has_animation() {
                return Ok(Vec::new());
            }
            decoder.into_frames()
        }
        _ => return Ok(Vec::new()),
    };
    collect(frames)
}

fn collect(frames: Frames<'_>) -> RenderResult<Vec<AnimationFrame>> {
    frames
        .map(|frame| {
            let frame = frame?;
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = if denom == 0 { 0 } else { u64::from(numer / denom) };
            Ok(AnimationFrame {
                delay: Duration::from_millis(millis),
                image: DynamicImage::ImageRgba8(frame.into_buffer()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn gif(frames: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            for n in 0..frames {
                let buffer = RgbaImage::from_pixel(4, 4, Rgba([n as u8 * 60, 0, 0, 255]));
                let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn test_gif_animation_detected() {
        assert!(is_animated(&gif(3), ImageFormat::Gif));
        assert!(!is_animated(&gif(1), ImageFormat::Gif));
    }

    #[test]
    fn test_decode_gif_frames() {
        let frames = decode_frames(&gif(3), ImageFormat::Gif).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].delay, Duration::from_millis(100));
        assert_eq!(frames[2].image.width(), 4);
    }

    #[test]
    fn test_still_formats_have_no_frames() {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(2, 2))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let png = png.into_inner();

        assert!(!is_animated(&png, ImageFormat::Png));
        assert!(decode_frames(&png, ImageFormat::Png).unwrap().is_empty());
        assert!(decode_frames(b"", ImageFormat::Bmp).unwrap().is_empty());
    }
}

//! Format sniffing and per-format capabilities.
//!
//! The kind of a resource is decided from its leading bytes, never from the
//! file extension. What a format can do (scaled decode, re-encoding,
//! lossless orientation changes) is described by [`FormatCapabilities`] so
//! callers never hard-code format lists.

use crate::error::{RenderError, RenderResult};
use image::ImageFormat;
use std::path::Path;

/// Number of leading bytes inspected when sniffing a text based format.
const SNIFF_TEXT_LIMIT: usize = 1024;

/// Classification of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Decodable to a pixel buffer.
    Raster,
    /// Vector graphics (SVG); rendered by an external collaborator.
    Vector,
    /// Nothing we recognize.
    Unknown,
}

impl ResourceKind {
    /// Lower-case name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Raster => "raster",
            ResourceKind::Vector => "vector",
            ResourceKind::Unknown => "unknown",
        }
    }
}

/// Result of sniffing a resource header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedFormat {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Raster format, set when `kind` is [`ResourceKind::Raster`].
    pub format: Option<ImageFormat>,
    /// MIME type.
    pub mime: &'static str,
}

impl SniffedFormat {
    fn raster(format: ImageFormat) -> Self {
        Self {
            kind: ResourceKind::Raster,
            format: Some(format),
            mime: format.to_mime_type(),
        }
    }

    fn vector() -> Self {
        Self {
            kind: ResourceKind::Vector,
            format: None,
            mime: "image/svg+xml",
        }
    }

    /// Capabilities of the sniffed format.
    pub fn capabilities(&self) -> FormatCapabilities {
        match self.format {
            Some(format) => FormatCapabilities::of(format),
            None => FormatCapabilities::default(),
        }
    }
}

/// Sniff the kind and format of a resource from its leading bytes.
///
/// # Errors
/// [`RenderError::EmptyInput`] for zero bytes and
/// [`RenderError::UnknownFormat`] when no format matches.
pub fn sniff(bytes: &[u8]) -> RenderResult<SniffedFormat> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyInput);
    }

    if let Ok(format) = image::guess_format(bytes) {
        if format.reading_enabled() {
            return Ok(SniffedFormat::raster(format));
        }
    }

    if looks_like_svg(bytes) {
        return Ok(SniffedFormat::vector());
    }

    Err(RenderError::UnknownFormat)
}

/// Sniff the given bytes, mapping unrecognized data to [`ResourceKind::Unknown`]
/// instead of an error.
pub fn sniff_kind(bytes: &[u8]) -> ResourceKind {
    sniff(bytes)
        .map(|sniffed| sniffed.kind)
        .unwrap_or(ResourceKind::Unknown)
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_TEXT_LIMIT)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<svg") {
        return true;
    }
    (text.starts_with("<?xml") || text.starts_with("<!DOCTYPE svg")) && text.contains("<svg")
}

/// Resolve a user supplied format name ("jpg", "png", ...) or fall back to
/// the extension of `path`.
pub fn output_format(name: Option<&str>, path: &Path) -> RenderResult<ImageFormat> {
    let format = match name {
        Some(name) => ImageFormat::from_extension(name),
        None => ImageFormat::from_path(path).ok(),
    };
    match format {
        Some(format) if format.writing_enabled() => Ok(format),
        Some(format) => Err(RenderError::UnsupportedOutput(
            format.extensions_str().first().copied().unwrap_or("?").to_string(),
        )),
        None => Err(RenderError::UnsupportedOutput(
            name.map(str::to_string)
                .unwrap_or_else(|| path.display().to_string()),
        )),
    }
}

/// What a raster format supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatCapabilities {
    /// The codec can decode directly at a reduced power-of-two scale.
    pub scaled_decode: bool,
    /// An encoder exists, so edits can be saved back in this format.
    pub writable: bool,
    /// Orientation can change by rewriting metadata without re-encoding.
    pub lossless_orientation: bool,
    /// The container may hold an embedded preview thumbnail.
    pub embedded_preview: bool,
}

impl FormatCapabilities {
    /// Capabilities of a raster format.
    pub fn of(format: ImageFormat) -> Self {
        let is_jpeg = format == ImageFormat::Jpeg;
        Self {
            scaled_decode: is_jpeg,
            writable: format.writing_enabled(),
            lossless_orientation: is_jpeg,
            embedded_preview: is_jpeg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_sniff_empty_input() {
        assert!(matches!(sniff(&[]), Err(RenderError::EmptyInput)));
    }

    #[test]
    fn test_sniff_raster_formats() {
        let png = sniff(&encoded(ImageFormat::Png)).unwrap();
        assert_eq!(png.kind, ResourceKind::Raster);
        assert_eq!(png.format, Some(ImageFormat::Png));
        assert_eq!(png.mime, "image/png");

        let jpeg = sniff(&encoded(ImageFormat::Jpeg)).unwrap();
        assert_eq!(jpeg.format, Some(ImageFormat::Jpeg));
        assert_eq!(jpeg.mime, "image/jpeg");
    }

    #[test]
    fn test_sniff_svg() {
        let svg = br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg"/>"#;
        let sniffed = sniff(svg).unwrap();
        assert_eq!(sniffed.kind, ResourceKind::Vector);
        assert_eq!(sniffed.mime, "image/svg+xml");
        assert_eq!(sniff_kind(b"  <svg width=\"1\"/>"), ResourceKind::Vector);
    }

    #[test]
    fn test_sniff_unknown() {
        assert!(matches!(sniff(b"plain text"), Err(RenderError::UnknownFormat)));
        assert_eq!(sniff_kind(b"plain text"), ResourceKind::Unknown);
    }

    #[test]
    fn test_capabilities_depend_on_format() {
        let jpeg = FormatCapabilities::of(ImageFormat::Jpeg);
        assert!(jpeg.scaled_decode);
        assert!(jpeg.lossless_orientation);
        assert!(jpeg.writable);

        let png = FormatCapabilities::of(ImageFormat::Png);
        assert!(!png.scaled_decode);
        assert!(png.writable);

        let svg = sniff(b"<svg/>").unwrap();
        assert!(!svg.capabilities().writable);
    }

    #[test]
    fn test_output_format_from_name_or_path() {
        assert_eq!(
            output_format(Some("jpg"), Path::new("x")).unwrap(),
            ImageFormat::Jpeg
        );
        assert_eq!(
            output_format(None, Path::new("/tmp/out.png")).unwrap(),
            ImageFormat::Png
        );
        assert!(output_format(None, Path::new("/tmp/out.unknown")).is_err());
    }
}

//! Header and EXIF probing without decoding pixel data.

use crate::error::RenderResult;
use crate::format::FormatCapabilities;
use crate::orientation::Orientation;
use exif::{Context, Exif, In, Tag};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Values longer than this are truncated in the key/value model.
const MAX_VALUE_LEN: usize = 256;

/// One entry of the metadata key/value model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    /// Namespaced key, e.g. `Exif.Image.Make` or `General.ImageSize`.
    pub key: String,
    /// Human-readable label.
    pub label: String,
    /// Display value.
    pub value: String,
}

impl MetaEntry {
    /// Build an entry.
    pub fn new(key: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Everything learned from the header and metadata blocks of an image.
#[derive(Debug, Clone, Default)]
pub struct ImageMetadata {
    /// Dimensions of the stored pixels, before orientation correction.
    pub stored_size: (u32, u32),
    /// Orientation from EXIF, `Normal` when absent.
    pub orientation: Orientation,
    /// Embedded JPEG preview from the EXIF thumbnail IFD.
    pub embedded_preview: Option<EmbeddedPreview>,
    /// EXIF fields of the primary image.
    pub entries: Vec<MetaEntry>,
}

impl ImageMetadata {
    /// Dimensions after orientation correction, as displayed.
    pub fn display_size(&self) -> (u32, u32) {
        self.orientation.transformed_size(self.stored_size)
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }
}

/// A JPEG thumbnail stored inside the EXIF block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPreview {
    /// Compressed JPEG bytes.
    pub data: Vec<u8>,
    /// Stored dimensions of the preview.
    pub size: (u32, u32),
}

impl EmbeddedPreview {
    /// Largest side of the preview.
    pub fn max_dimension(&self) -> u32 {
        self.size.0.max(self.size.1)
    }
}

/// Probe dimensions, orientation and EXIF fields of an encoded image.
///
/// Only the header is parsed for dimensions. A missing or broken EXIF block
/// is not an error: orientation defaults to `Normal`.
pub fn probe(bytes: &[u8], format: ImageFormat) -> RenderResult<ImageMetadata> {
    let stored_size = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    let mut metadata = ImageMetadata {
        stored_size,
        ..ImageMetadata::default()
    };

    if let Some(exif) = read_exif(bytes) {
        metadata.orientation = exif_orientation(&exif);
        metadata.entries = exif_entries(&exif);
        if FormatCapabilities::of(format).embedded_preview {
            metadata.embedded_preview = embedded_preview(&exif);
        }
    }

    debug!(
        ?format,
        width = stored_size.0,
        height = stored_size.1,
        orientation = ?metadata.orientation,
        "probed image header"
    );
    Ok(metadata)
}

/// Parse the EXIF block of any container `kamadak-exif` understands.
pub fn read_exif(bytes: &[u8]) -> Option<Exif> {
    let mut cursor = Cursor::new(bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => Some(exif),
        Err(exif::Error::NotFound(_)) => None,
        Err(err) => {
            debug!(error = %err, "ignoring unreadable EXIF block");
            None
        }
    }
}

/// Orientation tag of the primary image.
pub fn exif_orientation(exif: &Exif) -> Orientation {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(Orientation::from_exif)
        .unwrap_or_default()
}

fn exif_entries(exif: &Exif) -> Vec<MetaEntry> {
    exif.fields()
        .filter(|field| field.ifd_num == In::PRIMARY)
        .filter(|field| {
            !matches!(
                field.tag,
                Tag::ExifIFDPointer
                    | Tag::GPSInfoIFDPointer
                    | Tag::InteropIFDPointer
                    | Tag::MakerNote
            )
        })
        .map(|field| {
            let group = match field.tag.context() {
                Context::Tiff => "Exif.Image",
                Context::Exif => "Exif.Photo",
                Context::Gps => "Exif.GPSInfo",
                Context::Interop => "Exif.Iop",
                _ => "Exif.Unknown",
            };
            let name = field.tag.to_string();
            let mut value = field.display_value().with_unit(exif).to_string();
            if value.len() > MAX_VALUE_LEN {
                let mut cut = MAX_VALUE_LEN;
                while !value.is_char_boundary(cut) {
                    cut -= 1;
                }
                value.truncate(cut);
            }
            MetaEntry::new(format!("{group}.{name}"), name, value)
        })
        .collect()
}

fn embedded_preview(exif: &Exif) -> Option<EmbeddedPreview> {
    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let length = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;

    let data = exif.buf().get(offset..offset.checked_add(length)?)?.to_vec();
    let size = ImageReader::with_format(Cursor::new(&data), ImageFormat::Jpeg)
        .into_dimensions()
        .ok()?;
    Some(EmbeddedPreview { data, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::set_jpeg_orientation;
    use image::{DynamicImage, RgbImage};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_probe_without_exif() {
        let metadata = probe(&jpeg(30, 20), ImageFormat::Jpeg).unwrap();
        assert_eq!(metadata.stored_size, (30, 20));
        assert_eq!(metadata.orientation, Orientation::Normal);
        assert!(metadata.embedded_preview.is_none());
        assert!(metadata.entries.is_empty());
    }

    #[test]
    fn test_probe_reads_orientation() {
        let bytes = set_jpeg_orientation(&jpeg(30, 20), Orientation::Rotate90).unwrap();
        let metadata = probe(&bytes, ImageFormat::Jpeg).unwrap();

        assert_eq!(metadata.stored_size, (30, 20));
        assert_eq!(metadata.orientation, Orientation::Rotate90);
        assert_eq!(metadata.display_size(), (20, 30));
        assert!(metadata.get("Exif.Image.Orientation").is_some());
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(probe(b"not an image", ImageFormat::Png).is_err());
    }
}

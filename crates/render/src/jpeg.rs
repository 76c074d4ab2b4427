//! Lossless JPEG orientation changes.
//!
//! Rotating a JPEG by re-encoding it loses quality. Instead the EXIF
//! Orientation tag is rewritten and the compressed image data is copied
//! through untouched.

use crate::error::{RenderError, RenderResult};
use crate::metadata::read_exif;
use crate::orientation::Orientation;
use exif::experimental::Writer;
use exif::{Exif, Field, In, Tag, Value};
use std::io::Cursor;
use tracing::{debug, warn};

const MARKER_PREFIX: u8 = 0xFF;
const SOI: u8 = 0xD8;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest payload an APP segment can carry (the length field counts itself).
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Markers without a length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD9)
}

struct Segment {
    marker: u8,
    start: usize,
    end: usize,
}

/// Split the header of a JPEG stream into segments, stopping at SOS.
///
/// Returns the segments and the offset of the SOS marker.
fn header_segments(bytes: &[u8]) -> RenderResult<(Vec<Segment>, usize)> {
    if bytes.len() < 4 || bytes[0] != MARKER_PREFIX || bytes[1] != SOI {
        return Err(RenderError::NotJpeg);
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        // Fill bytes between segments are allowed.
        while bytes.get(pos) == Some(&MARKER_PREFIX) && bytes.get(pos + 1) == Some(&MARKER_PREFIX) {
            pos += 1;
        }
        if pos + 2 > bytes.len() || bytes[pos] != MARKER_PREFIX {
            return Err(RenderError::TruncatedJpeg);
        }

        let marker = bytes[pos + 1];
        if marker == SOS {
            return Ok((segments, pos));
        }
        if is_standalone(marker) {
            pos += 2;
            continue;
        }
        if pos + 4 > bytes.len() {
            return Err(RenderError::TruncatedJpeg);
        }

        let length = usize::from(u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]));
        let end = pos + 2 + length;
        if length < 2 || end > bytes.len() {
            return Err(RenderError::TruncatedJpeg);
        }
        segments.push(Segment { marker, start: pos, end });
        pos = end;
    }
}

fn is_exif_segment(bytes: &[u8], segment: &Segment) -> bool {
    segment.marker == APP1 && bytes[segment.start + 4..segment.end].starts_with(EXIF_HEADER)
}

/// Serialize a TIFF block that keeps every field of `exif` except the
/// orientation, which is replaced.
fn rewrite_tiff(exif: &Exif, orientation: &Field) -> RenderResult<Vec<u8>> {
    let mut writer = Writer::new();
    for field in exif.fields() {
        let synthesized = matches!(
            field.tag,
            Tag::Orientation
                | Tag::ExifIFDPointer
                | Tag::GPSInfoIFDPointer
                | Tag::InteropIFDPointer
                | Tag::JPEGInterchangeFormat
                | Tag::JPEGInterchangeFormatLength
                | Tag::StripOffsets
                | Tag::StripByteCounts
        );
        if !synthesized || (field.tag == Tag::Orientation && field.ifd_num != In::PRIMARY) {
            writer.push_field(field);
        }
    }
    writer.push_field(orientation);

    let thumbnail = thumbnail_slice(exif);
    if let Some(jpeg) = thumbnail {
        writer.set_jpeg(jpeg, In::THUMBNAIL);
    }

    let mut out = Cursor::new(Vec::new());
    writer.write(&mut out, exif.little_endian())?;
    Ok(out.into_inner())
}

fn thumbnail_slice(exif: &Exif) -> Option<&[u8]> {
    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let length = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    exif.buf().get(offset..offset.checked_add(length)?)
}

fn orientation_only_tiff(orientation: &Field) -> RenderResult<Vec<u8>> {
    let mut writer = Writer::new();
    writer.push_field(orientation);
    let mut out = Cursor::new(Vec::new());
    writer.write(&mut out, false)?;
    Ok(out.into_inner())
}

/// Return a copy of `jpeg` whose EXIF Orientation tag is `orientation`.
///
/// Other EXIF fields and the embedded preview are preserved when they can be
/// re-serialized; otherwise only the orientation is written. The entropy
/// coded image data is copied byte for byte.
///
/// # Errors
/// [`RenderError::NotJpeg`] or [`RenderError::TruncatedJpeg`] for malformed
/// input, [`RenderError::ExifTooLarge`] if the block exceeds one segment.
pub fn set_jpeg_orientation(jpeg: &[u8], orientation: Orientation) -> RenderResult<Vec<u8>> {
    let (segments, _sos) = header_segments(jpeg)?;

    let field = Field {
        tag: Tag::Orientation,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![orientation.to_exif()]),
    };

    let tiff = match read_exif(jpeg) {
        Some(exif) => rewrite_tiff(&exif, &field).or_else(|err| {
            warn!(error = %err, "cannot re-serialize EXIF block, keeping orientation only");
            orientation_only_tiff(&field)
        })?,
        None => orientation_only_tiff(&field)?,
    };

    let payload_len = EXIF_HEADER.len() + tiff.len();
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(RenderError::ExifTooLarge(payload_len));
    }

    // New APP1 goes after SOI and a leading JFIF APP0, replacing any old one.
    let insert_at = segments
        .first()
        .filter(|segment| segment.marker == APP0)
        .map(|segment| segment.end)
        .unwrap_or(2);

    let mut out = Vec::with_capacity(jpeg.len() + payload_len + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[MARKER_PREFIX, APP1]);
    out.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(&tiff);

    let mut pos = insert_at;
    for segment in segments.iter().filter(|s| s.start >= insert_at) {
        if is_exif_segment(jpeg, segment) {
            out.extend_from_slice(&jpeg[pos..segment.start]);
            pos = segment.end;
        }
    }
    out.extend_from_slice(&jpeg[pos..]);

    debug!(orientation = ?orientation, bytes = out.len(), "rewrote JPEG orientation");
    Ok(out)
}

//! Image Viewer Render Library
//!
//! Decoding logic shared by documents and the thumbnail pipeline: format
//! sniffing, header and EXIF probing, orientation handling, scaled decoding,
//! animation frames, encoding and lossless JPEG orientation changes.

pub mod animation;
pub mod decode;
pub mod encode;
pub mod error;
pub mod format;
pub mod jpeg;
pub mod metadata;
pub mod orientation;

pub use animation::{decode_frames, is_animated, AnimationFrame};
pub use decode::{
    decode, decode_with_metadata, reduced_size, scale_factor_for, DecodeTarget, DecodedImage,
    MAX_SCALE_FACTOR,
};
pub use encode::{encode, DEFAULT_JPEG_QUALITY};
pub use error::{RenderError, RenderResult};
pub use format::{output_format, sniff, sniff_kind, FormatCapabilities, ResourceKind, SniffedFormat};
pub use jpeg::set_jpeg_orientation;
pub use metadata::{probe, EmbeddedPreview, ImageMetadata, MetaEntry};
pub use orientation::Orientation;

pub use image::{DynamicImage, ImageFormat};

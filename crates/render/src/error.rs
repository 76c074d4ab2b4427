//! Errors raised while sniffing, probing, decoding or encoding images.

use std::io;

/// Errors that can occur during image operations
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The resource contains no bytes at all.
    #[error("file is empty")]
    EmptyInput,

    /// The header matches no supported format.
    #[error("unknown image format")]
    UnknownFormat,

    /// The format is recognized but cannot be decoded to pixels here.
    #[error("{0} images cannot be decoded to pixels")]
    NotRaster(&'static str),

    /// The requested output format has no encoder.
    #[error("saving as {0} is not supported")]
    UnsupportedOutput(String),

    /// The operation requires JPEG data.
    #[error("data is not a JPEG stream")]
    NotJpeg,

    /// The JPEG stream ended before the first image marker.
    #[error("truncated JPEG stream")]
    TruncatedJpeg,

    /// A rewritten EXIF block does not fit into one APP1 segment.
    #[error("EXIF block of {0} bytes does not fit into an APP1 segment")]
    ExifTooLarge(usize),

    /// The decoded image has a zero dimension.
    #[error("image has an empty size")]
    EmptyImage,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Decoder or encoder failure from the `image` crate.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Native JPEG decoder failure.
    #[error("JPEG decode error: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    /// EXIF parsing or serialization failure.
    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),
}

/// Result type for image operations
pub type RenderResult<T> = Result<T, RenderError>;

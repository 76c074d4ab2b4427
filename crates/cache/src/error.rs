//! Errors raised by the thumbnail store.

use std::io;

/// Errors that can occur while reading or writing thumbnails
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// I/O error reading or writing a cache file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Thumbnail pixels could not be decoded
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// PNG encoding failed
    #[error("PNG encode error: {0}")]
    PngEncode(#[from] png::EncodingError),

    /// PNG header or text chunks could not be parsed
    #[error("PNG decode error: {0}")]
    PngDecode(#[from] png::DecodingError),

    /// A required provenance key is absent or malformed
    #[error("thumbnail metadata `{0}` missing or invalid")]
    MissingMetadata(&'static str),
}

/// Result type for thumbnail store operations
pub type CacheResult<T> = Result<T, CacheError>;

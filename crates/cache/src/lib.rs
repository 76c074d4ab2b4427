//! Image Viewer Cache Library
//!
//! Persistent on-disk thumbnail cache shared with other applications:
//! fingerprinted PNG files with provenance metadata, a freshness check
//! against the origin's modification time, and atomic writes.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod store;

pub use config::{ConfigError, ThumbnailCacheConfig, ThumbnailGroup, THUMBNAIL_DIR_ENV};
pub use error::{CacheError, CacheResult};
pub use fingerprint::{fingerprint, origin_uri, thumbnail_file_name};
pub use store::{keys, read_info, CachedThumbnail, Lookup, StoreStats, ThumbnailInfo, ThumbnailStore};

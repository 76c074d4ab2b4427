//! Persistent thumbnail store.
//!
//! Thumbnails are PNG files at `<base>/<group>/<md5(uri)>.png`. Each file
//! records its provenance in PNG text chunks. An entry is fresh only while
//! its stored URI and modification time match the origin. New entries are
//! written to a temporary file in the target directory and renamed into
//! place, so concurrent readers never observe a partial file.

use crate::config::{ThumbnailCacheConfig, ThumbnailGroup};
use crate::error::{CacheError, CacheResult};
use crate::fingerprint::thumbnail_file_name;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// PNG text keys used for provenance.
pub mod keys {
    /// Origin URI.
    pub const URI: &str = "Thumb::Uri";
    /// Origin modification time in seconds since the epoch.
    pub const MTIME: &str = "Thumb::MTime";
    /// Origin size in bytes.
    pub const SIZE: &str = "Thumb::Size";
    /// Origin MIME type.
    pub const MIMETYPE: &str = "Thumb::Mimetype";
    /// Width of the origin image.
    pub const IMAGE_WIDTH: &str = "Thumb::Image::Width";
    /// Height of the origin image.
    pub const IMAGE_HEIGHT: &str = "Thumb::Image::Height";
    /// Program that wrote the thumbnail.
    pub const SOFTWARE: &str = "Software";
}

/// Provenance metadata stored with each thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailInfo {
    /// Origin URI, credentials stripped.
    pub uri: String,
    /// Origin modification time in seconds since the epoch.
    pub mtime: u64,
    /// Origin size in bytes, if known.
    pub size: Option<u64>,
    /// Origin MIME type, if known.
    pub mime: Option<String>,
    /// Dimensions of the origin image.
    pub image_size: (u32, u32),
}

/// A fresh cache entry.
#[derive(Debug, Clone)]
pub struct CachedThumbnail {
    /// Thumbnail pixels.
    pub image: DynamicImage,
    /// Provenance read back from the file.
    pub info: ThumbnailInfo,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A fresh entry exists.
    Hit(CachedThumbnail),
    /// An entry exists but no longer matches the origin, or is unreadable.
    Stale,
    /// No entry exists.
    Missing,
}

/// Counters for monitoring the thumbnail cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Fresh entries returned
    pub hits: u64,
    /// Lookups with no entry
    pub misses: u64,
    /// Lookups that found an outdated or broken entry
    pub stale: u64,
    /// Entries written
    pub writes: u64,
}

/// Thumbnail store rooted at a configured base directory.
///
/// Cheap to clone; clones share statistics.
#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    config: ThumbnailCacheConfig,
    stats: Arc<Mutex<StoreStats>>,
}

impl ThumbnailStore {
    /// Create a store. Directories are created lazily on first write.
    pub fn new(config: ThumbnailCacheConfig) -> Self {
        Self {
            config,
            stats: Arc::new(Mutex::new(StoreStats::default())),
        }
    }

    /// Configuration of this store.
    pub fn config(&self) -> &ThumbnailCacheConfig {
        &self.config
    }

    /// Path of the thumbnail for `uri` in `group`.
    pub fn path_for(&self, group: ThumbnailGroup, uri: &str) -> PathBuf {
        self.config.group_dir(group).join(thumbnail_file_name(uri))
    }

    /// Returns `true` if `path` lies inside the thumbnail base directory.
    pub fn contains_path(&self, path: &Path) -> bool {
        path.starts_with(&self.config.base_dir)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats)) {
        update(&mut self.stats.lock());
    }

    /// Look up the thumbnail of `uri` and check it against `mtime`.
    pub fn lookup(&self, group: ThumbnailGroup, uri: &str, mtime: u64) -> Lookup {
        let path = self.path_for(group, uri);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %err, "thumbnail unreadable");
                }
                self.record(|s| s.misses += 1);
                return Lookup::Missing;
            }
        };

        let info = match read_info(&bytes) {
            Ok(info) if info.uri == uri && info.mtime == mtime => info,
            Ok(info) => {
                trace!(uri, cached_mtime = info.mtime, mtime, "thumbnail is stale");
                self.record(|s| s.stale += 1);
                return Lookup::Stale;
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "thumbnail metadata unreadable");
                self.record(|s| s.stale += 1);
                return Lookup::Stale;
            }
        };

        match image::load_from_memory_with_format(&bytes, ImageFormat::Png) {
            Ok(image) => {
                self.record(|s| s.hits += 1);
                Lookup::Hit(CachedThumbnail { image, info })
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "thumbnail pixels unreadable");
                self.record(|s| s.stale += 1);
                Lookup::Stale
            }
        }
    }

    /// Write a thumbnail for `info.uri` and atomically move it into place.
    ///
    /// Returns the final path.
    pub fn store(
        &self,
        group: ThumbnailGroup,
        image: &DynamicImage,
        info: &ThumbnailInfo,
    ) -> CacheResult<PathBuf> {
        let dir = self.config.group_dir(group);
        create_private_dir(&dir)?;

        let bytes = encode_png(image, info, &self.config.software)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".imgview-thumb-")
            .suffix(".png")
            .tempfile_in(&dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_data()?;

        let path = self.path_for(group, &info.uri);
        temp.persist(&path).map_err(|err| CacheError::Io(err.error))?;

        self.record(|s| s.writes += 1);
        debug!(uri = %info.uri, path = %path.display(), "thumbnail stored");
        Ok(path)
    }

    /// Remove the thumbnails of `uri` from every group.
    ///
    /// Returns how many files were deleted.
    pub fn delete_thumbnails(&self, uri: &str) -> CacheResult<usize> {
        let mut removed = 0;
        for group in ThumbnailGroup::ALL {
            let path = self.path_for(group, uri);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to delete thumbnail");
                    return Err(err.into());
                }
            }
        }
        Ok(removed)
    }

    /// Load a file that lives inside the thumbnail directory as-is.
    pub fn load_direct(&self, path: &Path) -> CacheResult<DynamicImage> {
        let bytes = fs::read(path)?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Read provenance text chunks from an encoded PNG.
pub fn read_info(png_bytes: &[u8]) -> CacheResult<ThumbnailInfo> {
    let decoder = png::Decoder::new(Cursor::new(png_bytes));
    let reader = decoder.read_info()?;
    let info = reader.info();

    let text = |key: &str| -> Option<String> {
        info.uncompressed_latin1_text
            .iter()
            .find(|chunk| chunk.keyword == key)
            .map(|chunk| chunk.text.clone())
            .or_else(|| {
                info.utf8_text
                    .iter()
                    .find(|chunk| chunk.keyword == key)
                    .and_then(|chunk| chunk.get_text().ok())
            })
    };
    let number = |key: &'static str| -> CacheResult<u64> {
        text(key)
            .and_then(|value| value.trim().parse().ok())
            .ok_or(CacheError::MissingMetadata(key))
    };

    let width = u32::try_from(number(keys::IMAGE_WIDTH)?)
        .map_err(|_| CacheError::MissingMetadata(keys::IMAGE_WIDTH))?;
    let height = u32::try_from(number(keys::IMAGE_HEIGHT)?)
        .map_err(|_| CacheError::MissingMetadata(keys::IMAGE_HEIGHT))?;

    Ok(ThumbnailInfo {
        uri: text(keys::URI).ok_or(CacheError::MissingMetadata(keys::URI))?,
        mtime: number(keys::MTIME)?,
        size: text(keys::SIZE).and_then(|value| value.trim().parse().ok()),
        mime: text(keys::MIMETYPE),
        image_size: (width, height),
    })
}

fn encode_png(image: &DynamicImage, info: &ThumbnailInfo, software: &str) -> CacheResult<Vec<u8>> {
    let (color, data, width, height) = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        let (w, h) = rgba.dimensions();
        (png::ColorType::Rgba, rgba.into_raw(), w, h)
    } else {
        let rgb = image.to_rgb8();
        let (w, h) = rgb.dimensions();
        (png::ColorType::Rgb, rgb.into_raw(), w, h)
    };

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);

        let mut chunks = vec![
            (keys::URI, info.uri.clone()),
            (keys::MTIME, info.mtime.to_string()),
            (keys::IMAGE_WIDTH, info.image_size.0.to_string()),
            (keys::IMAGE_HEIGHT, info.image_size.1.to_string()),
            (keys::SOFTWARE, software.to_string()),
        ];
        if let Some(size) = info.size {
            chunks.push((keys::SIZE, size.to_string()));
        }
        if let Some(mime) = &info.mime {
            chunks.push((keys::MIMETYPE, mime.clone()));
        }
        for (key, value) in chunks {
            encoder.add_text_chunk(key.to_string(), value)?;
        }

        let mut writer = encoder.write_header()?;
        writer.write_image_data(&data)?;
        writer.finish()?;
    }
    Ok(out)
}

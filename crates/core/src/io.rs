//! I/O collaborator contract.
//!
//! Documents and thumbnail jobs never touch the filesystem directly. They go
//! through a [`ResourceIo`] implementation so embedders can plug in network
//! transports. [`LocalFileIo`] covers `file://` URLs.

use crate::identifier::DocumentUrl;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Result of [`ResourceIo::stat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStat {
    /// Modification time in seconds since the Unix epoch.
    pub modified: u64,
    /// Size in bytes.
    pub size: u64,
    /// `false` when the resource does not exist.
    pub exists: bool,
    /// `true` for directories.
    pub is_dir: bool,
}

/// Access to resources named by a [`DocumentUrl`].
///
/// Implementations are called from worker threads.
pub trait ResourceIo: Send + Sync {
    /// Stat the resource.
    fn stat(&self, url: &DocumentUrl) -> io::Result<ResourceStat>;

    /// Read the whole resource.
    fn read(&self, url: &DocumentUrl) -> io::Result<Vec<u8>>;

    /// Replace the resource with `bytes`.
    fn write(&self, url: &DocumentUrl, bytes: &[u8]) -> io::Result<()>;

    /// Copy the resource to a local file.
    fn download(&self, url: &DocumentUrl, dest: &Path) -> io::Result<()> {
        let bytes = self.read(url)?;
        fs::write(dest, bytes)
    }

    /// `true` when stat is cheap enough to run on the main context.
    fn is_fast_local(&self, url: &DocumentUrl) -> bool {
        url.is_local()
    }
}

/// [`ResourceIo`] for `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileIo;

impl LocalFileIo {
    fn path(url: &DocumentUrl) -> io::Result<std::path::PathBuf> {
        url.to_file_path().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported url scheme: {}", url.as_url().scheme()),
            )
        })
    }
}

impl ResourceIo for LocalFileIo {
    fn stat(&self, url: &DocumentUrl) -> io::Result<ResourceStat> {
        let path = Self::path(url)?;
        match fs::metadata(&path) {
            Ok(metadata) => {
                let modified = metadata
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|age| age.as_secs())
                    .unwrap_or(0);
                Ok(ResourceStat {
                    modified,
                    size: metadata.len(),
                    exists: true,
                    is_dir: metadata.is_dir(),
                })
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ResourceStat::default()),
            Err(err) => Err(err),
        }
    }

    fn read(&self, url: &DocumentUrl) -> io::Result<Vec<u8>> {
        fs::read(Self::path(url)?)
    }

    /// Writes through a temporary file in the target directory and renames
    /// it into place, so readers never see a partial file.
    fn write(&self, url: &DocumentUrl, bytes: &[u8]) -> io::Result<()> {
        let path = Self::path(url)?;
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".imgview-save-")
            .tempfile_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|err| err.error)?;

        debug!(path = %path.display(), bytes = bytes.len(), "file written");
        Ok(())
    }

    fn download(&self, url: &DocumentUrl, dest: &Path) -> io::Result<()> {
        fs::copy(Self::path(url)?, dest).map(|_| ())
    }
}

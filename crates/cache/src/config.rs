//! Thumbnail cache configuration and size groups.
//!
//! The cache location is passed explicitly to every component that needs
//! it. Configuration can come from environment variables or be built
//! programmatically.

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the thumbnail base directory.
pub const THUMBNAIL_DIR_ENV: &str = "IMGVIEW_THUMBNAIL_DIR";

/// Thumbnail size bucket. Each group has its own subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThumbnailGroup {
    /// Thumbnails fitting a 128 pixel square.
    #[default]
    Normal,
    /// Thumbnails fitting a 256 pixel square.
    Large,
}

impl ThumbnailGroup {
    /// Every group, smallest first.
    pub const ALL: [ThumbnailGroup; 2] = [ThumbnailGroup::Normal, ThumbnailGroup::Large];

    /// Edge length of the bounding square in pixels.
    pub fn pixel_size(self) -> u32 {
        match self {
            ThumbnailGroup::Normal => 128,
            ThumbnailGroup::Large => 256,
        }
    }

    /// Name of the subdirectory holding this group.
    pub fn dir_name(self) -> &'static str {
        match self {
            ThumbnailGroup::Normal => "normal",
            ThumbnailGroup::Large => "large",
        }
    }

    /// Smallest group whose thumbnails are at least `pixels` large.
    pub fn for_pixel_size(pixels: u32) -> Self {
        if pixels <= ThumbnailGroup::Normal.pixel_size() {
            ThumbnailGroup::Normal
        } else {
            ThumbnailGroup::Large
        }
    }
}

/// Configuration for the thumbnail cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailCacheConfig {
    /// Base directory containing the `normal` and `large` subdirectories.
    pub base_dir: PathBuf,
    /// Value written to the `Software` text chunk.
    pub software: String,
}

impl Default for ThumbnailCacheConfig {
    fn default() -> Self {
        Self {
            base_dir: Self::default_base_dir(),
            software: format!("imgview {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ThumbnailCacheConfig {
    /// Creates a configuration rooted at `base_dir`.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self::default().with_base_dir(base_dir)
    }

    /// Sets the base directory.
    pub fn with_base_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.base_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the `Software` value written into new thumbnails.
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = software.into();
        self
    }

    /// Returns the shared freedesktop thumbnail directory.
    ///
    /// - Linux: ~/.cache/thumbnails
    /// - macOS: ~/Library/Caches/thumbnails
    /// - Windows: %LOCALAPPDATA%\thumbnails
    pub fn default_base_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(cache_dir) => cache_dir.join("thumbnails"),
            None => PathBuf::from(".thumbnails"),
        }
    }

    /// Directory of one size group.
    pub fn group_dir(&self, group: ThumbnailGroup) -> PathBuf {
        self.base_dir.join(group.dir_name())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IMGVIEW_THUMBNAIL_DIR`: thumbnail base directory
    ///
    /// # Errors
    /// Returns an error if a variable is set but not valid unicode or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match env::var(THUMBNAIL_DIR_ENV) {
            Ok(val) if val.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(THUMBNAIL_DIR_ENV.to_string()));
            }
            Ok(val) => config.base_dir = PathBuf::from(val),
            Err(env::VarError::NotPresent) => {}
            Err(env::VarError::NotUnicode(_)) => {
                return Err(ConfigError::InvalidValue(THUMBNAIL_DIR_ENV.to_string()));
            }
        }

        Ok(config)
    }
}

/// Errors that can occur while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_groups() {
        assert_eq!(ThumbnailGroup::Normal.pixel_size(), 128);
        assert_eq!(ThumbnailGroup::Large.pixel_size(), 256);
        assert_eq!(ThumbnailGroup::Large.dir_name(), "large");
        assert_eq!(ThumbnailGroup::for_pixel_size(100), ThumbnailGroup::Normal);
        assert_eq!(ThumbnailGroup::for_pixel_size(129), ThumbnailGroup::Large);
    }

    #[test]
    fn test_builder_methods() {
        let config = ThumbnailCacheConfig::new("/tmp/thumbs").with_software("test");
        assert_eq!(config.base_dir, PathBuf::from("/tmp/thumbs"));
        assert_eq!(config.software, "test");
        assert_eq!(
            config.group_dir(ThumbnailGroup::Normal),
            PathBuf::from("/tmp/thumbs/normal")
        );
    }

    #[test]
    fn test_default_dir_ends_with_thumbnails() {
        let config = ThumbnailCacheConfig::default();
        assert!(config.base_dir.ends_with("thumbnails"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[THUMBNAIL_DIR_ENV]);

        env::set_var(THUMBNAIL_DIR_ENV, "/tmp/env-thumbs");
        let config = ThumbnailCacheConfig::from_env().unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/tmp/env-thumbs"));

        env::remove_var(THUMBNAIL_DIR_ENV);
        let config = ThumbnailCacheConfig::from_env().unwrap();
        assert_eq!(config.base_dir, ThumbnailCacheConfig::default_base_dir());
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[THUMBNAIL_DIR_ENV]);

        env::set_var(THUMBNAIL_DIR_ENV, "   ");
        assert!(ThumbnailCacheConfig::from_env().is_err());
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}

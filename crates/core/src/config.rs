//! Factory configuration.

use imgview_cache::ConfigError;
use imgview_render::DEFAULT_JPEG_QUALITY;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable for [`FactoryConfig::max_unreferenced`].
pub const MAX_UNREFERENCED_ENV: &str = "IMGVIEW_MAX_UNREFERENCED";
/// Environment variable for [`FactoryConfig::memory_budget`], in megabytes.
pub const MEMORY_BUDGET_ENV: &str = "IMGVIEW_MEMORY_BUDGET_MB";
/// Environment variable for [`FactoryConfig::jpeg_quality`].
pub const JPEG_QUALITY_ENV: &str = "IMGVIEW_JPEG_QUALITY";

/// Default number of unreferenced documents kept alive.
pub const DEFAULT_MAX_UNREFERENCED: usize = 3;
/// Default memory budget for cached documents (512 MB).
pub const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// Configuration of a [`DocumentFactory`](crate::DocumentFactory).
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryConfig {
    /// Unreferenced, idle, unmodified documents kept for quick re-opening.
    pub max_unreferenced: usize,
    /// Upper bound for the summed memory usage of all cached documents.
    pub memory_budget: usize,
    /// JPEG quality used when saving re-encoded images.
    pub jpeg_quality: u8,
    /// Longest time `wait_until_loaded` pumps the main context.
    pub load_timeout: Duration,
    /// Name of the decode worker thread.
    pub worker_name: String,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            max_unreferenced: DEFAULT_MAX_UNREFERENCED,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            load_timeout: Duration::from_secs(60),
            worker_name: "imgview-decoder".to_string(),
        }
    }
}

impl FactoryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many unreferenced documents are kept.
    pub fn with_max_unreferenced(mut self, count: usize) -> Self {
        self.max_unreferenced = count;
        self
    }

    /// Sets the memory budget in bytes.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sets the JPEG quality (clamped to 1-100).
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Sets the load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IMGVIEW_MAX_UNREFERENCED`: unreferenced documents kept (integer)
    /// - `IMGVIEW_MEMORY_BUDGET_MB`: memory budget in megabytes (integer)
    /// - `IMGVIEW_JPEG_QUALITY`: JPEG save quality, 1-100
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(count) = parse_var::<usize>(MAX_UNREFERENCED_ENV)? {
            config.max_unreferenced = count;
        }
        if let Some(megabytes) = parse_var::<usize>(MEMORY_BUDGET_ENV)? {
            config.memory_budget = megabytes.saturating_mul(1024 * 1024);
        }
        if let Some(quality) = parse_var::<u8>(JPEG_QUALITY_ENV)? {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::InvalidValue(JPEG_QUALITY_ENV.to_string()));
            }
            config.jpeg_quality = quality;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue(name.to_string())),
    }
}

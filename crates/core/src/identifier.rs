//! Normalized resource identifiers.

use crate::error::{DocumentError, DocumentResult};
use imgview_cache::origin_uri;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use url::Url;

/// Absolute URL identifying a document.
///
/// Equality and hashing use the normalized key, which has user name and
/// password removed. The full URL, credentials included, stays available
/// for I/O through [`DocumentUrl::as_url`].
#[derive(Clone)]
pub struct DocumentUrl {
    url: Url,
    key: String,
}

impl DocumentUrl {
    /// Wrap an already parsed URL. Dot segments are resolved by the parser.
    pub fn from_url(url: Url) -> Self {
        let key = origin_uri(&url);
        Self { url, key }
    }

    /// Identifier of a local path. Relative paths are resolved against the
    /// current directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> DocumentResult<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let url = Url::from_file_path(&absolute)
            .map_err(|()| DocumentError::InvalidUrl(absolute.display().to_string()))?;
        // Reparse so `.` and `..` segments are resolved.
        let url = Url::parse(url.as_str()).map_err(|err| DocumentError::InvalidUrl(err.to_string()))?;
        Ok(Self::from_url(url))
    }

    /// Parse a URL string, or treat the input as a local path when it has no
    /// scheme.
    pub fn parse(input: &str) -> DocumentResult<Self> {
        if input.contains("://") || input.starts_with("file:") {
            let url = Url::parse(input).map_err(|err| DocumentError::InvalidUrl(format!("{input}: {err}")))?;
            Ok(Self::from_url(url))
        } else {
            Self::from_path(input)
        }
    }

    /// Full URL, credentials included.
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Normalized key without credentials.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `true` for `file://` URLs.
    pub fn is_local(&self) -> bool {
        self.url.scheme() == "file"
    }

    /// Local path of a `file://` URL.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.is_local() {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }

    /// Last path segment, used as display name. Percent-decoded for local
    /// files.
    pub fn file_name(&self) -> String {
        if let Some(name) = self
            .to_file_path()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        {
            return name;
        }
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.key.clone())
    }

    /// Path component used to guess an output format from the extension.
    pub fn path(&self) -> PathBuf {
        self.to_file_path()
            .unwrap_or_else(|| PathBuf::from(self.url.path()))
    }
}

impl PartialEq for DocumentUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DocumentUrl {}

impl Hash for DocumentUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for DocumentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for DocumentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentUrl({})", self.key)
    }
}

impl From<Url> for DocumentUrl {
    fn from(url: Url) -> Self {
        Self::from_url(url)
    }
}

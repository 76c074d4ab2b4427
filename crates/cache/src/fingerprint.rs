//! Origin URI normalization and fingerprinting.
//!
//! A thumbnail is keyed by the MD5 of its origin URI, the name other
//! freedesktop thumbnail readers look up. Credentials are removed first so
//! the same file reached with different logins shares one thumbnail and no
//! password ends up in the cache.

use md5::{Digest, Md5};
use url::Url;

/// Origin URI of `url` with user name and password removed.
pub fn origin_uri(url: &Url) -> String {
    let mut stripped = url.clone();
    // Only fails for URLs that cannot carry credentials, which have none.
    let _ = stripped.set_username("");
    let _ = stripped.set_password(None);
    stripped.to_string()
}

/// Lower-case hex MD5 digest of `uri` (32 characters).
pub fn fingerprint(uri: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(uri.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File name of the thumbnail for `uri`.
pub fn thumbnail_file_name(uri: &str) -> String {
    format!("{}.png", fingerprint(uri))
}

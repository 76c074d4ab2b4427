//! Error types for documents, the factory and the thumbnail pipeline.

use imgview_cache::{CacheError, ConfigError};
use imgview_render::RenderError;
use imgview_scheduler::WorkerError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised by document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A path or URL could not be turned into an identifier.
    #[error("invalid document url: {0}")]
    InvalidUrl(String),

    /// Loading failed; carries the recorded error string.
    #[error("loading failed: {0}")]
    LoadingFailed(String),

    /// The operation needs a fully loaded image.
    #[error("document is not loaded")]
    NotLoaded,

    /// The document cannot be edited (vector, animated or read-only format).
    #[error("document is not editable")]
    NotEditable,

    /// Nothing to undo or redo.
    #[error("no operation to {0}")]
    NothingTo(&'static str),

    /// A crop rectangle lies outside the image.
    #[error("crop rectangle {width}x{height}+{x}+{y} is empty within the image")]
    EmptyCrop { x: u32, y: u32, width: u32, height: u32 },

    /// The document has unsaved edits and the caller did not confirm.
    #[error("document has unsaved changes: {0}")]
    UnsavedChanges(String),

    /// Decode or encode failure.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Thumbnail cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The background worker is unavailable.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// I/O collaborator failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

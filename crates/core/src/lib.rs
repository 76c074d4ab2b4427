//! Image Viewer Core Library
//!
//! Document model of the viewer:
//!
//! - [`DocumentFactory`]: one live [`Document`] per identifier, with
//!   eviction of unused documents and tracking of unsaved ones.
//! - [`Document`]: staged asynchronous loading, down-sampled previews,
//!   undoable edits, saving and reloading.
//! - [`ThumbnailLoadJob`]: sequential thumbnail generation backed by the
//!   shared on-disk cache.
//!
//! Work runs on background threads and completes through a
//! [`MainContext`](imgview_scheduler::MainContext) that the embedder pumps.

pub mod config;
pub mod document;
pub mod editor;
pub mod error;
pub mod event;
pub mod factory;
pub mod identifier;
pub mod io;
mod job;
pub mod operation;
pub mod thumbnail;
pub mod undo;

pub use config::FactoryConfig;
pub use document::{inverted_zoom_for, Document, LoadingState, MAX_DOWN_SAMPLED_ZOOM};
pub use editor::DocumentEditor;
pub use error::{DocumentError, DocumentResult};
pub use event::{DocumentEvent, FactoryEvent, Rect, Signal, SubscriptionId};
pub use factory::DocumentFactory;
pub use identifier::DocumentUrl;
pub use io::{LocalFileIo, ResourceIo, ResourceStat};
pub use operation::{CropOperation, ReplaceImageOperation, ResizeOperation, TransformOperation};
pub use thumbnail::{FileItem, PreviewProvider, ThumbnailEvent, ThumbnailJobHandle, ThumbnailLoadJob};
pub use undo::{ImageOperation, UndoStack};

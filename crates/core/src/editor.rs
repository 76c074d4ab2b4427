//! Editing interface of a loaded document.

use crate::document::Document;
use crate::error::{DocumentError, DocumentResult};
use crate::event::Rect;
use crate::operation::{CropOperation, ReplaceImageOperation, ResizeOperation, TransformOperation};
use imgview_render::{DynamicImage, Orientation};
use std::sync::Arc;

/// Handle returned by [`Document::editor`]. Every call records an undoable
/// operation.
#[derive(Debug, Clone)]
pub struct DocumentEditor {
    document: Arc<Document>,
}

impl DocumentEditor {
    pub(crate) fn new(document: Arc<Document>) -> Self {
        Self { document }
    }

    /// Document being edited.
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Rotate or flip.
    pub fn apply_transformation(&self, orientation: Orientation) -> DocumentResult<()> {
        self.document
            .push_operation(Box::new(TransformOperation::new(orientation)))
    }

    /// Crop to `rect`, clamped to the image. A rectangle with no pixel
    /// inside the image is rejected without touching the undo stack.
    pub fn crop(&self, rect: Rect) -> DocumentResult<()> {
        let size = self.document.size().ok_or(DocumentError::NotLoaded)?;
        if rect.clamped_to(size).is_empty() {
            let Rect { x, y, width, height } = rect;
            return Err(DocumentError::EmptyCrop { x, y, width, height });
        }
        self.document.push_operation(Box::new(CropOperation::new(rect)))
    }

    /// Resize to `width` x `height`.
    pub fn resize(&self, width: u32, height: u32) -> DocumentResult<()> {
        self.document
            .push_operation(Box::new(ResizeOperation::new(width, height)))
    }

    /// Replace the pixels with `image`, labelled `text` in the undo history.
    pub fn set_image(&self, text: impl Into<String>, image: DynamicImage) -> DocumentResult<()> {
        self.document
            .push_operation(Box::new(ReplaceImageOperation::new(text, image)))
    }
}

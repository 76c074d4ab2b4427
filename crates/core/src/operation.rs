//! Built-in edit operations.

use crate::event::Rect;
use crate::undo::ImageOperation;
use imgview_render::{DynamicImage, Orientation};
use image::imageops::FilterType;

/// Rotation or flip.
#[derive(Debug, Clone, Copy)]
pub struct TransformOperation {
    orientation: Orientation,
}

impl TransformOperation {
    pub fn new(orientation: Orientation) -> Self {
        Self { orientation }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }
}

impl ImageOperation for TransformOperation {
    fn text(&self) -> String {
        match self.orientation {
            Orientation::Normal => "No Change",
            Orientation::FlipHorizontal => "Mirror",
            Orientation::FlipVertical => "Flip",
            Orientation::Rotate90 => "Rotate Right",
            Orientation::Rotate180 => "Rotate 180",
            Orientation::Rotate270 => "Rotate Left",
            Orientation::Transpose => "Transpose",
            Orientation::Transverse => "Transverse",
        }
        .to_string()
    }

    fn redo(&mut self, image: &mut DynamicImage) {
        self.orientation.apply_in_place(image);
    }

    fn undo(&mut self, image: &mut DynamicImage) {
        self.orientation.inverse().apply_in_place(image);
    }

    fn orientation_change(&self) -> Option<Orientation> {
        Some(self.orientation)
    }
}

/// Crop to a rectangle, clamped to the image bounds.
#[derive(Debug)]
pub struct CropOperation {
    rect: Rect,
    original: Option<DynamicImage>,
}

impl CropOperation {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            original: None,
        }
    }
}

impl ImageOperation for CropOperation {
    fn text(&self) -> String {
        "Crop".to_string()
    }

    fn redo(&mut self, image: &mut DynamicImage) {
        let rect = self.rect.clamped_to((image.width(), image.height()));
        let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        self.original = Some(std::mem::replace(image, cropped));
    }

    fn undo(&mut self, image: &mut DynamicImage) {
        if let Some(original) = self.original.take() {
            *image = original;
        }
    }
}

/// Resize to exact dimensions.
#[derive(Debug)]
pub struct ResizeOperation {
    size: (u32, u32),
    original: Option<DynamicImage>,
}

impl ResizeOperation {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width.max(1), height.max(1)),
            original: None,
        }
    }
}

impl ImageOperation for ResizeOperation {
    fn text(&self) -> String {
        "Resize".to_string()
    }

    fn redo(&mut self, image: &mut DynamicImage) {
        let resized = image.resize_exact(self.size.0, self.size.1, FilterType::Lanczos3);
        self.original = Some(std::mem::replace(image, resized));
    }

    fn undo(&mut self, image: &mut DynamicImage) {
        if let Some(original) = self.original.take() {
            *image = original;
        }
    }
}

/// Swap in a completely new image, e.g. the output of an external filter.
#[derive(Debug)]
pub struct ReplaceImageOperation {
    text: String,
    other: DynamicImage,
}

impl ReplaceImageOperation {
    pub fn new(text: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            text: text.into(),
            other: image,
        }
    }
}

impl ImageOperation for ReplaceImageOperation {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn redo(&mut self, image: &mut DynamicImage) {
        std::mem::swap(image, &mut self.other);
    }

    fn undo(&mut self, image: &mut DynamicImage) {
        std::mem::swap(image, &mut self.other);
    }
}

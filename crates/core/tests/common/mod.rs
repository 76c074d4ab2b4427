#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use imgview_core::{Document, DocumentFactory, DocumentUrl, FactoryConfig, LoadingState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Horizontal gradient so orientation changes are visible.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    }))
}

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

/// Save `image` under `dir/name`; the format follows the extension.
pub fn write_image(dir: &Path, name: &str, image: &DynamicImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).expect("test image should be written");
    path
}

pub fn url_of(path: &Path) -> DocumentUrl {
    DocumentUrl::from_path(path).expect("path should convert to url")
}

pub fn factory() -> DocumentFactory {
    DocumentFactory::new(FactoryConfig::default()).expect("factory should start")
}

/// Pump until `document` reached at least `state`.
pub fn wait_for_state(factory: &DocumentFactory, document: &Arc<Document>, state: LoadingState) -> bool {
    factory
        .context()
        .process_until(|| document.loading_state() >= state, TIMEOUT)
}

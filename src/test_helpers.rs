//! Shared test utilities.
//!
//! Synthetic source images and JSON readers for the unit tests.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let source = tmp.path().join("source.jpg");
//! create_test_jpeg(&source, 300, 200);
//!
//! let info = read_json(&tmp.path().join("out/info.json"));
//! assert_eq!(info["width"], 300);
//! ```

use image::{ImageEncoder, RgbImage};
use std::path::Path;

// =========================================================================
// Images
// =========================================================================

/// A gradient, so tiles and renditions are not all the same colour.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Write a JPEG of the given dimensions, creating parent directories.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = gradient(width, height);
    let file = std::fs::File::create(path).unwrap();
    image::codecs::jpeg::JpegEncoder::new_with_quality(file, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Encode a JPEG into memory.
pub fn test_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    bytes
}

// =========================================================================
// JSON
// =========================================================================

pub fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    serde_json::from_slice(&bytes).unwrap()
}

/// Dimensions of an image file on disk.
pub fn image_size(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).unwrap()
}

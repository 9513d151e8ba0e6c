//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`generate`](crate::generate) stage (which decides
//! what derivatives to create) and the [`backend`](super::backend) (which does
//! the actual pixel work). This separation allows swapping engines (e.g. for
//! testing with a mock) without changing generation logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: Encodings written for tiles and renditions.
//! - [`PyramidParams`]: A complete IIIF tile pyramid rooted at an output directory.
//! - [`ResizeParams`]: One forced resize, encoded to one file.
//! - [`TiffParams`]: One pyramidal tiled TIFF.
//! - [`Jpeg2000Params`]: One JPEG 2000 file.

use crate::iiif::Layout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Image encodings the pipeline writes.
///
/// JPEG is the primary format: it is the IIIF default and every viewer reads
/// it. WebP is the secondary format advertised through `extraFormats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "jpg", alias = "jpeg")]
    Jpeg,
    #[serde(rename = "webp")]
    WebP,
}

impl OutputFormat {
    /// File extension, which is also the IIIF format name.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
        }
    }

    /// IANA media type.
    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Parameters for building a static tile pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidParams {
    /// Root of the image service; tiles and the `info.json` fragment go here.
    pub output_dir: PathBuf,
    /// Written as the `id` of the `info.json` fragment.
    pub service_id: String,
    pub tile_size: u32,
    pub format: OutputFormat,
    pub quality: Quality,
    pub layout: Layout,
}

/// Parameters for a forced (non aspect-preserving) resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: Quality,
}

/// Parameters for a pyramidal tiled TIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct TiffParams {
    pub output: PathBuf,
    pub tile_size: u32,
    /// Codec used inside each tile.
    pub codec: OutputFormat,
    pub quality: Quality,
}

/// Parameters for a JPEG 2000 file.
#[derive(Debug, Clone, PartialEq)]
pub struct Jpeg2000Params {
    pub output: PathBuf,
    /// Encoder-specific arguments, passed through untouched.
    pub args: Vec<String>,
}

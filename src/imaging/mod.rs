//! Image processing: pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (JPEG, PNG, TIFF, WebP) |
//! | **Resize → JPEG / WebP** | Lanczos3 + `image` encoders |
//! | **Tile pyramid** | IIIF static layout, tiles encoded in parallel |
//! | **Pyramidal TIFF** | custom tiled TIFF writer |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for pyramid math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageEngine`] trait + [`RustEngine`]
//! - **TIFF**: the pyramidal container writer

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;
pub mod tiff;

pub use backend::{EngineError, ImageEngine};
pub use calculations::{TileSpec, level_size, level_tiles, scale_factors, tile_grid};
pub use params::{
    Jpeg2000Params, OutputFormat, PyramidParams, Quality, ResizeParams, TiffParams,
};
pub use rust_backend::RustEngine;

//! Image processing engine trait and shared types.
//!
//! The [`ImageEngine`] trait is the boundary between the pipeline and pixel
//! work. An engine is bound to one decoded source image and must support
//! four operations: tile pyramid, forced resize, pyramidal TIFF and
//! JPEG 2000.
//!
//! The production implementation is
//! [`RustEngine`](super::rust_backend::RustEngine), pure Rust on top of the
//! `image` crate. Every operation is independent: a failure in one never
//! affects the engine's ability to run the next.

use super::params::{Jpeg2000Params, PyramidParams, ResizeParams, TiffParams};
use crate::iiif::Size;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Trait for image processing engines.
///
/// Engines are shared across rayon workers, so implementations must be `Sync`
/// and every method takes `&self`.
pub trait ImageEngine: Sync {
    /// Full dimensions of the source image.
    fn dimensions(&self) -> Size;

    /// Write a complete static tile pyramid under `params.output_dir`,
    /// including an `info.json` fragment. Overwrites an existing fragment.
    fn tile_pyramid(&self, params: &PyramidParams) -> Result<(), EngineError>;

    /// Resize to exactly `width`×`height` and encode to `params.output`.
    fn resize(&self, params: &ResizeParams) -> Result<(), EngineError>;

    /// Write a multi-resolution tiled TIFF.
    fn pyramidal_tiff(&self, params: &TiffParams) -> Result<(), EngineError>;

    /// Write a JPEG 2000 file.
    fn jpeg2000(&self, params: &Jpeg2000Params) -> Result<(), EngineError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::iiif::{ImageService, Layout};
    use crate::imaging::{OutputFormat, Quality, scale_factors};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Mock engine that records operations and writes placeholder files.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockEngine {
        pub size: Option<Size>,
        pub operations: Mutex<Vec<RecordedOp>>,
        /// Formats whose tile pyramid fails.
        pub failing_pyramids: Vec<OutputFormat>,
        /// Formats whose resizes fail.
        pub failing_resizes: Vec<OutputFormat>,
        /// Widths whose resizes fail, in any format.
        pub failing_widths: Vec<u32>,
        /// Single (format, width) renditions that fail.
        pub failing_renditions: Vec<(OutputFormat, u32)>,
        pub failing_tiff: bool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        TilePyramid {
            output_dir: PathBuf,
            format: OutputFormat,
            tile_size: u32,
            layout: Layout,
        },
        Resize {
            output: PathBuf,
            width: u32,
            height: u32,
            format: OutputFormat,
            quality: u32,
        },
        PyramidalTiff {
            output: PathBuf,
            codec: OutputFormat,
            tile_size: u32,
        },
        Jpeg2000 {
            output: PathBuf,
        },
    }

    fn placeholder(path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"mock")?;
        Ok(())
    }

    impl MockEngine {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                size: Some(Size::new(width, height)),
                ..Self::default()
            }
        }

        pub fn failing_pyramid(mut self, format: OutputFormat) -> Self {
            self.failing_pyramids.push(format);
            self
        }

        pub fn failing_resize(mut self, format: OutputFormat) -> Self {
            self.failing_resizes.push(format);
            self
        }

        pub fn failing_width(mut self, width: u32) -> Self {
            self.failing_widths.push(width);
            self
        }

        pub fn failing_rendition(mut self, format: OutputFormat, width: u32) -> Self {
            self.failing_renditions.push((format, width));
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }
    }

    impl ImageEngine for MockEngine {
        fn dimensions(&self) -> Size {
            self.size.unwrap_or(Size::new(1, 1))
        }

        fn tile_pyramid(&self, params: &PyramidParams) -> Result<(), EngineError> {
            self.record(RecordedOp::TilePyramid {
                output_dir: params.output_dir.clone(),
                format: params.format,
                tile_size: params.tile_size,
                layout: params.layout,
            });
            if self.failing_pyramids.contains(&params.format) {
                return Err(EngineError::ProcessingFailed("mock pyramid failure".into()));
            }
            let size = self.dimensions();
            let fragment = ImageService::tiled_fragment(
                &params.service_id,
                size,
                params.tile_size,
                scale_factors(size, params.tile_size),
            );
            fs::create_dir_all(&params.output_dir)?;
            let json = serde_json::to_vec_pretty(&fragment)
                .map_err(|e| EngineError::ProcessingFailed(e.to_string()))?;
            fs::write(params.output_dir.join("info.json"), json)?;
            placeholder(&params.output_dir.join(format!(
                "0,0,{},{}/{}/0/default.{}",
                size.width,
                size.height,
                params.layout.primary_segment(size.width, size.height),
                params.format.extension()
            )))
        }

        fn resize(&self, params: &ResizeParams) -> Result<(), EngineError> {
            self.record(RecordedOp::Resize {
                output: params.output.clone(),
                width: params.width,
                height: params.height,
                format: params.format,
                quality: params.quality.value(),
            });
            if self.failing_resizes.contains(&params.format)
                || self.failing_widths.contains(&params.width)
                || self
                    .failing_renditions
                    .contains(&(params.format, params.width))
            {
                return Err(EngineError::ProcessingFailed("mock resize failure".into()));
            }
            placeholder(&params.output)
        }

        fn pyramidal_tiff(&self, params: &TiffParams) -> Result<(), EngineError> {
            self.record(RecordedOp::PyramidalTiff {
                output: params.output.clone(),
                codec: params.codec,
                tile_size: params.tile_size,
            });
            if self.failing_tiff {
                return Err(EngineError::ProcessingFailed("mock tiff failure".into()));
            }
            placeholder(&params.output)
        }

        fn jpeg2000(&self, params: &Jpeg2000Params) -> Result<(), EngineError> {
            self.record(RecordedOp::Jpeg2000 {
                output: params.output.clone(),
            });
            Err(EngineError::Unsupported("mock has no JPEG 2000 encoder".into()))
        }
    }

    #[test]
    fn mock_records_resize() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = MockEngine::new(800, 600);
        let output = tmp.path().join("full/400,300/0/default.jpg");

        engine
            .resize(&ResizeParams {
                output: output.clone(),
                width: 400,
                height: 300,
                format: OutputFormat::Jpeg,
                quality: Quality::new(90),
            })
            .unwrap();

        assert!(output.exists());
        let ops = engine.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            RecordedOp::Resize {
                width: 400,
                height: 300,
                quality: 90,
                ..
            }
        ));
    }

    #[test]
    fn mock_pyramid_writes_fragment() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = MockEngine::new(3000, 2000);
        engine
            .tile_pyramid(&PyramidParams {
                output_dir: tmp.path().to_path_buf(),
                service_id: "svc".into(),
                tile_size: 512,
                format: OutputFormat::WebP,
                quality: Quality::default(),
                layout: Layout::V3,
            })
            .unwrap();

        let fragment = crate::iiif::image_service::read_fragment(&tmp.path().join("info.json"))
            .unwrap();
        assert_eq!(fragment.id, "svc");
        assert_eq!(fragment.tiles[0].scale_factors, vec![1, 2, 4, 8]);
    }

    #[test]
    fn mock_failures_are_configurable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = MockEngine::new(100, 100).failing_pyramid(OutputFormat::WebP);
        let params = PyramidParams {
            output_dir: tmp.path().to_path_buf(),
            service_id: "svc".into(),
            tile_size: 512,
            format: OutputFormat::WebP,
            quality: Quality::default(),
            layout: Layout::V3,
        };
        assert!(engine.tile_pyramid(&params).is_err());
        assert_eq!(engine.get_operations().len(), 1);
    }
}

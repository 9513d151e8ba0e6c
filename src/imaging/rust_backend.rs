//! Pure Rust image processing engine.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with a guessed format |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Tile pyramid | cascaded level resize + `crop_imm`, tiles encoded in parallel with `rayon` |
//! | Pyramidal TIFF | [`PyramidalTiffWriter`](super::tiff::PyramidalTiffWriter) |
//! | JPEG 2000 | not available: [`EngineError::Unsupported`] |
//!
//! The pure Rust WebP encoder is lossless only, so `quality` applies to JPEG
//! output and is ignored for WebP.

use super::backend::{EngineError, ImageEngine};
use super::calculations::{TileSpec, level_size, level_tiles, scale_factors};
use super::params::{
    Jpeg2000Params, OutputFormat, PyramidParams, Quality, ResizeParams, TiffParams,
};
use super::tiff::PyramidalTiffWriter;
use crate::iiif::{ImageService, Size};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbImage};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

/// Engine over one decoded source image.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustEngine {
    image: DynamicImage,
}

impl RustEngine {
    /// Decode the image at `path`, sniffing the format from its bytes.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        reader.no_limits();
        let image = reader.decode().map_err(|e| {
            EngineError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        Ok(Self { image })
    }

    /// Decode an image held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        reader.no_limits();
        let image = reader
            .decode()
            .map_err(|e| EngineError::ProcessingFailed(format!("Failed to decode image: {e}")))?;
        Ok(Self { image })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Visit every pyramid level, full resolution first. Each level is
    /// resized from the previous one.
    fn for_each_level(
        &self,
        tile_size: u32,
        mut visit: impl FnMut(u32, &DynamicImage) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let full = self.dimensions();
        let mut reduced: Option<DynamicImage> = None;
        for sf in scale_factors(full, tile_size) {
            if sf > 1 {
                let target = level_size(full, sf);
                let previous = reduced.as_ref().unwrap_or(&self.image);
                reduced = Some(previous.resize_exact(
                    target.width,
                    target.height,
                    FilterType::Lanczos3,
                ));
            }
            visit(sf, reduced.as_ref().unwrap_or(&self.image))?;
        }
        Ok(())
    }
}

/// Encode as RGB8 into any writer.
fn encode<W: Write>(
    img: &DynamicImage,
    writer: W,
    format: OutputFormat,
    quality: Quality,
) -> Result<(), EngineError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let result = match format {
        OutputFormat::Jpeg => JpegEncoder::new_with_quality(writer, quality.value() as u8)
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8),
        OutputFormat::WebP => WebPEncoder::new_lossless(writer).write_image(
            rgb.as_raw(),
            width,
            height,
            ExtendedColorType::Rgb8,
        ),
    };
    result.map_err(|e| EngineError::ProcessingFailed(format!("{format} encode failed: {e}")))
}

/// Encode to `path`, creating parent directories.
fn save(
    img: &DynamicImage,
    path: &Path,
    format: OutputFormat,
    quality: Quality,
) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    encode(img, &mut writer, format, quality)?;
    writer.flush()?;
    Ok(())
}

/// Crop a tile out of its level.
fn crop(level: &DynamicImage, tile: &TileSpec) -> DynamicImage {
    let (x, y) = tile.level_origin;
    level.crop_imm(x, y, tile.size.width, tile.size.height)
}

impl ImageEngine for RustEngine {
    fn dimensions(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    fn tile_pyramid(&self, params: &PyramidParams) -> Result<(), EngineError> {
        let full = self.dimensions();
        let ext = params.format.extension();
        let mut factors = Vec::new();

        self.for_each_level(params.tile_size, |sf, level| {
            factors.push(sf);
            level_tiles(full, params.tile_size, sf)
                .par_iter()
                .try_for_each(|tile| -> Result<(), EngineError> {
                    let region_dir = params.output_dir.join(tile.region_segment());
                    let (w, h) = (tile.size.width, tile.size.height);
                    let primary = region_dir
                        .join(params.layout.primary_segment(w, h))
                        .join(format!("0/default.{ext}"));
                    save(&crop(level, tile), &primary, params.format, params.quality)?;
                    if let Some(mirror) = params.layout.mirror_segment(w) {
                        let mirror = region_dir.join(mirror).join(format!("0/default.{ext}"));
                        if let Some(parent) = mirror.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::copy(&primary, &mirror)?;
                    }
                    Ok(())
                })
        })?;

        let fragment =
            ImageService::tiled_fragment(&params.service_id, full, params.tile_size, factors);
        let json = serde_json::to_vec_pretty(&fragment)
            .map_err(|e| EngineError::ProcessingFailed(format!("info.json: {e}")))?;
        fs::write(params.output_dir.join("info.json"), json)?;
        Ok(())
    }

    fn resize(&self, params: &ResizeParams) -> Result<(), EngineError> {
        let resized = self
            .image
            .resize_exact(params.width, params.height, FilterType::Lanczos3);
        save(&resized, &params.output, params.format, params.quality)
    }

    fn pyramidal_tiff(&self, params: &TiffParams) -> Result<(), EngineError> {
        let full = self.dimensions();
        let ts = params.tile_size;
        if let Some(parent) = params.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(&params.output)?);
        let tiff_err = |e: super::tiff::TiffError| EngineError::ProcessingFailed(e.to_string());
        let mut writer = PyramidalTiffWriter::new(file, params.codec).map_err(tiff_err)?;

        self.for_each_level(ts, |sf, level| {
            let encoded = level_tiles(full, ts, sf)
                .par_iter()
                .map(|tile| -> Result<Vec<u8>, EngineError> {
                    // Every tile in a TIFF is full size; pad the edges
                    let mut canvas = RgbImage::new(ts, ts);
                    image::imageops::replace(&mut canvas, &crop(level, tile).to_rgb8(), 0, 0);
                    let mut buf = Vec::new();
                    encode(
                        &DynamicImage::ImageRgb8(canvas),
                        Cursor::new(&mut buf),
                        params.codec,
                        params.quality,
                    )?;
                    Ok(buf)
                })
                .collect::<Result<Vec<_>, _>>()?;
            writer
                .write_level(level.width(), level.height(), ts, &encoded)
                .map_err(tiff_err)
        })?;

        writer.finish().map_err(tiff_err)?;
        Ok(())
    }

    fn jpeg2000(&self, params: &Jpeg2000Params) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(format!(
            "no JPEG 2000 encoder is available; cannot write {}",
            params.output.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iiif::Layout;
    use crate::iiif::image_service::read_fragment;
    use crate::test_helpers::{create_test_jpeg, gradient, image_size, test_jpeg_bytes};
    use std::path::PathBuf;

    fn engine(width: u32, height: u32) -> RustEngine {
        RustEngine::from_image(DynamicImage::ImageRgb8(gradient(width, height)))
    }

    fn pyramid(dir: PathBuf, format: OutputFormat, layout: Layout) -> PyramidParams {
        PyramidParams {
            output_dir: dir,
            service_id: "https://example.org/iiif/img".into(),
            tile_size: 128,
            format,
            quality: Quality::new(80),
            layout,
        }
    }

    #[test]
    fn open_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let engine = RustEngine::open(&path).unwrap();
        assert_eq!(engine.dimensions(), Size::new(200, 150));
    }

    #[test]
    fn open_nonexistent_file_errors() {
        assert!(RustEngine::open(Path::new("/nonexistent/image.jpg")).is_err());
    }

    #[test]
    fn from_bytes_reads_dimensions() {
        let engine = RustEngine::from_bytes(&test_jpeg_bytes(64, 48)).unwrap();
        assert_eq!(engine.dimensions(), Size::new(64, 48));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(RustEngine::from_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn resize_is_exact_in_both_formats() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = engine(400, 300);
        for format in [OutputFormat::Jpeg, OutputFormat::WebP] {
            let output = tmp.path().join(format!("full/100,100/0/default.{format}"));
            engine
                .resize(&ResizeParams {
                    output: output.clone(),
                    width: 100,
                    height: 100,
                    format,
                    quality: Quality::new(85),
                })
                .unwrap();
            assert_eq!(image_size(&output), (100, 100));
        }
    }

    #[test]
    fn tile_pyramid_layout_v3() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = engine(300, 200);
        engine
            .tile_pyramid(&pyramid(tmp.path().to_path_buf(), OutputFormat::Jpeg, Layout::V3))
            .unwrap();

        let root = tmp.path();
        assert!(root.join("0,0,128,128/128,128/0/default.jpg").exists());
        // Edge tile at full resolution
        let edge = root.join("256,128,44,72/44,72/0/default.jpg");
        assert_eq!(image_size(&edge), (44, 72));
        // Top level: whole image in one tile
        assert!(root.join("0,0,300,200/75,50/0/default.jpg").exists());
        assert!(!root.join("0,0,128,128/128,/0/default.jpg").exists());

        let fragment = read_fragment(&root.join("info.json")).unwrap();
        assert_eq!(fragment.width, 300);
        assert_eq!(fragment.tiles[0].width, 128);
        assert_eq!(fragment.tiles[0].scale_factors, vec![1, 2, 4]);
    }

    #[test]
    fn tile_pyramid_layout_v2_and_v3_mirrors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = engine(300, 200);
        engine
            .tile_pyramid(&pyramid(
                tmp.path().to_path_buf(),
                OutputFormat::WebP,
                Layout::V2AndV3,
            ))
            .unwrap();

        let v3 = tmp.path().join("0,0,128,128/128,128/0/default.webp");
        let v2 = tmp.path().join("0,0,128,128/128,/0/default.webp");
        assert_eq!(fs::read(&v3).unwrap(), fs::read(&v2).unwrap());
    }

    #[test]
    fn tile_pyramid_layout_v2_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let engine = engine(300, 200);
        engine
            .tile_pyramid(&pyramid(tmp.path().to_path_buf(), OutputFormat::Jpeg, Layout::V2))
            .unwrap();
        assert!(tmp.path().join("0,0,128,128/128,/0/default.jpg").exists());
        assert!(!tmp.path().join("0,0,128,128/128,128/0/default.jpg").exists());
    }

    #[test]
    fn pyramidal_tiff_has_one_ifd_per_level() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("out/img.jpg.tif");
        engine(300, 200)
            .pyramidal_tiff(&TiffParams {
                output: output.clone(),
                tile_size: 128,
                codec: OutputFormat::Jpeg,
                quality: Quality::new(85),
            })
            .unwrap();

        let buf = fs::read(&output).unwrap();
        assert_eq!(&buf[0..4], b"II\x2a\x00");

        let mut ifds = 0;
        let mut at = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        while at != 0 {
            ifds += 1;
            let n = u16::from_le_bytes(buf[at..at + 2].try_into().unwrap()) as usize;
            let next = at + 2 + n * 12;
            at = u32::from_le_bytes(buf[next..next + 4].try_into().unwrap()) as usize;
        }
        assert_eq!(ifds, 3);
    }

    #[test]
    fn jpeg2000_is_unsupported() {
        let result = engine(10, 10).jpeg2000(&Jpeg2000Params {
            output: "/tmp/x.jp2".into(),
            args: vec![],
        });
        assert!(matches!(result, Err(EngineError::Unsupported(_))));
    }
}

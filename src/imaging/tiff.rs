//! Pyramidal tiled TIFF writer.
//!
//! Produces a classic (32-bit offset) little-endian TIFF with one tiled IFD
//! per pyramid level, full resolution first. Reduced levels are flagged with
//! `NewSubfileType = 1`, the convention libvips, OpenSlide and GDAL read as a
//! pyramid.
//!
//! Tiles arrive already encoded. The writer only lays out bytes:
//!
//! ```text
//! header | level 0 tiles | level 0 arrays | IFD 0 | level 1 tiles | ... | IFD n
//! ```
//!
//! Each IFD's next-IFD pointer is patched once the following IFD has been
//! written.

use crate::imaging::OutputFormat;
use std::io::{self, Seek, SeekFrom, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TiffError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TIFF exceeds the 4 GiB classic TIFF limit")]
    TooLarge,
    #[error("level {width}x{height} needs {expected} tiles, got {actual}")]
    TileCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("no levels written")]
    Empty,
}

// =============================================================================
// Tag vocabulary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum FieldType {
    Short = 3,
    Long = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
enum TiffTag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    SamplesPerPixel = 277,
    PlanarConfiguration = 284,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    YCbCrSubSampling = 530,
}

const COMPRESSION_JPEG: u16 = 7;
/// Registered by GDAL for WebP-compressed tiles.
const COMPRESSION_WEBP: u16 = 50001;
const PHOTOMETRIC_RGB: u16 = 2;
const PHOTOMETRIC_YCBCR: u16 = 6;

/// Values of one IFD entry.
enum Value {
    Short(Vec<u16>),
    Long(Vec<u32>),
}

impl Value {
    fn field_type(&self) -> FieldType {
        match self {
            Value::Short(_) => FieldType::Short,
            Value::Long(_) => FieldType::Long,
        }
    }

    fn count(&self) -> usize {
        match self {
            Value::Short(v) => v.len(),
            Value::Long(v) => v.len(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Short(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Value::Long(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

/// Streams pyramid levels into a TIFF file.
pub struct PyramidalTiffWriter<W: Write + Seek> {
    out: W,
    codec: OutputFormat,
    /// File position of the pointer that must receive the next IFD offset.
    next_ifd_pointer: u64,
    levels: usize,
}

fn offset32(position: u64) -> Result<u32, TiffError> {
    u32::try_from(position).map_err(|_| TiffError::TooLarge)
}

impl<W: Write + Seek> PyramidalTiffWriter<W> {
    pub fn new(mut out: W, codec: OutputFormat) -> Result<Self, TiffError> {
        out.write_all(b"II")?;
        out.write_all(&42u16.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?;
        Ok(Self {
            out,
            codec,
            next_ifd_pointer: 4,
            levels: 0,
        })
    }

    fn position(&mut self) -> Result<u64, TiffError> {
        Ok(self.out.stream_position()?)
    }

    /// Pad to an even offset; TIFF requires word-aligned IFDs and arrays.
    fn align(&mut self) -> Result<(), TiffError> {
        if self.position()? % 2 == 1 {
            self.out.write_all(&[0])?;
        }
        Ok(())
    }

    /// Append one level. `tiles` holds the encoded tiles row by row, each
    /// covering a full `tile_size` square (edge tiles padded).
    pub fn write_level(
        &mut self,
        width: u32,
        height: u32,
        tile_size: u32,
        tiles: &[Vec<u8>],
    ) -> Result<(), TiffError> {
        let expected = (width.div_ceil(tile_size) * height.div_ceil(tile_size)) as usize;
        if tiles.len() != expected {
            return Err(TiffError::TileCount {
                width,
                height,
                expected,
                actual: tiles.len(),
            });
        }

        let mut offsets = Vec::with_capacity(tiles.len());
        let mut counts = Vec::with_capacity(tiles.len());
        for tile in tiles {
            self.align()?;
            offsets.push(offset32(self.position()?)?);
            counts.push(offset32(tile.len() as u64)?);
            self.out.write_all(tile)?;
        }

        let (compression, photometric) = match self.codec {
            OutputFormat::Jpeg => (COMPRESSION_JPEG, PHOTOMETRIC_YCBCR),
            OutputFormat::WebP => (COMPRESSION_WEBP, PHOTOMETRIC_RGB),
        };
        let subfile = if self.levels == 0 { 0 } else { 1 };

        let mut entries = vec![
            (TiffTag::NewSubfileType, Value::Long(vec![subfile])),
            (TiffTag::ImageWidth, Value::Long(vec![width])),
            (TiffTag::ImageLength, Value::Long(vec![height])),
            (TiffTag::BitsPerSample, Value::Short(vec![8, 8, 8])),
            (TiffTag::Compression, Value::Short(vec![compression])),
            (TiffTag::PhotometricInterpretation, Value::Short(vec![photometric])),
            (TiffTag::SamplesPerPixel, Value::Short(vec![3])),
            (TiffTag::PlanarConfiguration, Value::Short(vec![1])),
            (TiffTag::TileWidth, Value::Long(vec![tile_size])),
            (TiffTag::TileLength, Value::Long(vec![tile_size])),
            (TiffTag::TileOffsets, Value::Long(offsets)),
            (TiffTag::TileByteCounts, Value::Long(counts)),
        ];
        if self.codec == OutputFormat::Jpeg {
            // Tiles are encoded without chroma subsampling
            entries.push((TiffTag::YCbCrSubSampling, Value::Short(vec![1, 1])));
        }
        entries.sort_by_key(|(tag, _)| *tag);

        // Values longer than 4 bytes live outside the IFD
        let mut out_of_line = Vec::with_capacity(entries.len());
        for (_, value) in &entries {
            let bytes = value.to_bytes();
            if bytes.len() > 4 {
                self.align()?;
                out_of_line.push(Some(offset32(self.position()?)?));
                self.out.write_all(&bytes)?;
            } else {
                out_of_line.push(None);
            }
        }

        self.align()?;
        let ifd_offset = offset32(self.position()?)?;
        self.out.write_all(&(entries.len() as u16).to_le_bytes())?;
        for ((tag, value), offset) in entries.iter().zip(&out_of_line) {
            self.out.write_all(&(*tag as u16).to_le_bytes())?;
            self.out.write_all(&(value.field_type() as u16).to_le_bytes())?;
            self.out.write_all(&(value.count() as u32).to_le_bytes())?;
            match offset {
                Some(at) => self.out.write_all(&at.to_le_bytes())?,
                None => {
                    let mut inline = value.to_bytes();
                    inline.resize(4, 0);
                    self.out.write_all(&inline)?;
                }
            }
        }
        let next_pointer = self.position()?;
        self.out.write_all(&0u32.to_le_bytes())?;
        offset32(self.position()?)?;

        self.out.seek(SeekFrom::Start(self.next_ifd_pointer))?;
        self.out.write_all(&ifd_offset.to_le_bytes())?;
        self.out.seek(SeekFrom::End(0))?;

        self.next_ifd_pointer = next_pointer;
        self.levels += 1;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W, TiffError> {
        if self.levels == 0 {
            return Err(TiffError::Empty);
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

//! Pure calculation functions for tile pyramids.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! A pyramid level is identified by its scale factor `sf`: level `sf` is the
//! full image shrunk by `sf` in both directions (rounding up). Tiles are
//! `tile_size` pixels square in level coordinates, so a tile covers a
//! `tile_size * sf` square region of the full image.

use crate::iiif::Size;

/// Scale factors for a pyramid over `full`: 1, 2, 4, ... up to and including
/// the first level whose longer edge fits in one tile.
///
/// # Examples
/// ```
/// # use static_iiif::imaging::scale_factors;
/// # use static_iiif::iiif::Size;
/// assert_eq!(scale_factors(Size::new(3000, 2000), 512), vec![1, 2, 4, 8]);
/// assert_eq!(scale_factors(Size::new(300, 200), 512), vec![1]);
/// ```
pub fn scale_factors(full: Size, tile_size: u32) -> Vec<u32> {
    let longest = full.width.max(full.height);
    let tile_size = tile_size.max(1);
    let mut factors = vec![1u32];
    let mut sf = 1u32;
    while longest.div_ceil(sf) > tile_size {
        sf = match sf.checked_mul(2) {
            Some(next) => next,
            None => break,
        };
        factors.push(sf);
    }
    factors
}

/// Dimensions of the level at scale factor `sf`.
pub fn level_size(full: Size, sf: u32) -> Size {
    Size::new(full.width.div_ceil(sf), full.height.div_ceil(sf))
}

/// Number of tile columns and rows covering a level.
pub fn tile_grid(level: Size, tile_size: u32) -> (u32, u32) {
    (level.width.div_ceil(tile_size), level.height.div_ceil(tile_size))
}

/// One tile of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    /// Region of the full image: x, y, width, height.
    pub region: (u32, u32, u32, u32),
    /// Pixel size of the tile image.
    pub size: Size,
    /// Top-left corner of the tile in level coordinates.
    pub level_origin: (u32, u32),
}

impl TileSpec {
    /// The `{x},{y},{w},{h}` region segment of the tile's IIIF path.
    pub fn region_segment(&self) -> String {
        let (x, y, w, h) = self.region;
        format!("{x},{y},{w},{h}")
    }
}

/// All tiles of the level at scale factor `sf`, row by row.
pub fn level_tiles(full: Size, tile_size: u32, sf: u32) -> Vec<TileSpec> {
    let level = level_size(full, sf);
    let (cols, rows) = tile_grid(level, tile_size);
    let span = tile_size.saturating_mul(sf);

    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = col * span;
            let y = row * span;
            let rw = span.min(full.width - x);
            let rh = span.min(full.height - y);
            tiles.push(TileSpec {
                region: (x, y, rw, rh),
                size: Size::new(rw.div_ceil(sf), rh.div_ceil(sf)),
                level_origin: (col * tile_size, row * tile_size),
            });
        }
    }
    tiles
}

//! Conversion of quantized images into the hardware's palette + tile frames.
//!
//! A frame record is the 16-entry palette (u16 BE each) followed by the
//! packed tiles in raster order. Each tile is 8x8 4-bit palette indices,
//! two per byte, high nibble first.

use std::collections::HashMap;
use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use image::RgbImage;

use crate::error::{Error, Result};
use crate::format::ColorDepth;

mod pixmap;

pub use pixmap::{decode_pixmap, encode_pixmap_file, FrameDirectory};

pub const TILE_PIXELS: u32 = 8;
pub const TILE_BYTES: usize = 32;
pub const PALETTE_SLOTS: usize = 16;
pub const PALETTE_BYTES: usize = PALETTE_SLOTS * 2;

/// Size of an image in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
}

impl TileGrid {
    pub const FULLSCREEN: TileGrid = TileGrid {
        width: 32,
        height: 28,
    };
    pub const THUMBNAIL: TileGrid = TileGrid {
        width: 16,
        height: 14,
    };

    pub const fn tile_count(self) -> usize {
        (self.width * self.height) as usize
    }

    /// Bytes of one encoded frame record on this grid.
    pub const fn frame_size(self) -> usize {
        PALETTE_BYTES + self.tile_count() * TILE_BYTES
    }
}

/// Insertion-ordered mapping from color key to palette slot.
///
/// Slot 0 is the transparent entry and holds color 0, so black pixels land
/// there too.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: [u16; PALETTE_SLOTS],
    slots: HashMap<u16, u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    pub fn new() -> Self {
        Self {
            colors: [0; PALETTE_SLOTS],
            slots: HashMap::from([(0, 0)]),
        }
    }

    /// Slot for `color`, assigning the next free one on first sight.
    /// `None` once all 16 slots are taken.
    pub fn slot_for(&mut self, color: u16) -> Option<u8> {
        if let Some(&slot) = self.slots.get(&color) {
            return Some(slot);
        }

        let slot = self.slots.len();
        if slot >= PALETTE_SLOTS {
            return None;
        }

        self.colors[slot] = color;
        self.slots.insert(color, slot as u8);
        Some(slot as u8)
    }

    /// All 16 entries; unused trailing slots are zero.
    pub fn colors(&self) -> [u16; PALETTE_SLOTS] {
        self.colors
    }
}

/// One displayable image in the hardware's native layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub grid: TileGrid,
    /// Precision of the palette's color keys.
    pub depth: ColorDepth,
    pub palette: [u16; PALETTE_SLOTS],
    /// Packed tiles, `grid.tile_count() * 32` bytes.
    pub tiles: Vec<u8>,
}

impl Frame {
    /// Builds a frame from a quantized image that must cover exactly `grid`.
    pub fn encode(image: &RgbImage, grid: TileGrid, depth: ColorDepth) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width % TILE_PIXELS != 0 || height % TILE_PIXELS != 0 {
            return Err(Error::NotTileAligned { width, height });
        }

        let (tiles_w, tiles_h) = (width / TILE_PIXELS, height / TILE_PIXELS);
        if (tiles_w, tiles_h) != (grid.width, grid.height) {
            return Err(Error::GridMismatch {
                expected_w: grid.width,
                expected_h: grid.height,
                found_w: tiles_w,
                found_h: tiles_h,
            });
        }

        let mut palette = Palette::new();
        let mut tiles = BytesMut::with_capacity(grid.tile_count() * TILE_BYTES);

        for tile_y in 0..tiles_h {
            for tile_x in 0..tiles_w {
                let mut high = None;

                for y in 0..TILE_PIXELS {
                    for x in 0..TILE_PIXELS {
                        let (px, py) = (tile_x * TILE_PIXELS + x, tile_y * TILE_PIXELS + y);
                        let [r, g, b] = image.get_pixel(px, py).0;
                        let color = depth.color_key(r, g, b);
                        let slot = palette.slot_for(color).ok_or(Error::PaletteOverflow {
                            color,
                            x: px,
                            y: py,
                        })?;

                        match high.take() {
                            None => high = Some(slot),
                            Some(first) => tiles.put_u8((first << 4) | slot),
                        }
                    }
                }
            }
        }

        Ok(Self {
            grid,
            depth,
            palette: palette.colors(),
            tiles: tiles.to_vec(),
        })
    }

    /// Parses a frame record back into its palette and tiles. The record
    /// itself does not say which color depth produced it.
    pub fn from_bytes(bytes: &[u8], grid: TileGrid, depth: ColorDepth) -> Result<Self> {
        if bytes.len() != grid.frame_size() {
            return Err(Error::FrameRecord {
                expected: grid.frame_size(),
                found: bytes.len(),
            });
        }

        let mut reader = bytes;
        let mut palette = [0u16; PALETTE_SLOTS];
        for entry in palette.iter_mut() {
            *entry = reader.get_u16();
        }

        Ok(Self {
            grid,
            depth,
            palette,
            tiles: reader.to_vec(),
        })
    }

    /// Fails unless the frame was encoded at `depth`.
    pub fn check_depth(&self, depth: ColorDepth) -> Result<()> {
        if self.depth != depth {
            return Err(Error::ColorDepthMismatch {
                expected: depth,
                found: self.depth,
            });
        }
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        PALETTE_BYTES + self.tiles.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        for color in self.palette {
            out.put_u16(color);
        }
        out.put_slice(&self.tiles);
        out.to_vec()
    }

    pub fn write_to(&self, mut writer: impl Write) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Palette slot of the pixel at (`x`, `y`) in image coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        let tile = (y / TILE_PIXELS) * self.grid.width + x / TILE_PIXELS;
        let within = (y % TILE_PIXELS) * TILE_PIXELS + x % TILE_PIXELS;
        let byte = self.tiles[tile as usize * TILE_BYTES + within as usize / 2];

        if within % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }
}

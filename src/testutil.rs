use image::{Rgb, RgbImage};

use crate::format::ColorDepth;
use crate::tile::{Frame, TileGrid};

/// Binary pixmap of one solid color.
pub fn pixmap(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let mut bytes = format!("P6\n{width} {height}\n255\n").into_bytes();
    for _ in 0..width * height {
        bytes.extend_from_slice(&rgb);
    }
    bytes
}

/// Full-screen frame of one color.
pub fn solid_frame(rgb: [u8; 3]) -> Frame {
    solid_frame_at(ColorDepth::ThreeBit, rgb)
}

pub fn solid_frame_at(depth: ColorDepth, rgb: [u8; 3]) -> Frame {
    let image = RgbImage::from_pixel(256, 224, Rgb(rgb));
    Frame::encode(&image, TileGrid::FULLSCREEN, depth).unwrap()
}

/// Checkerboard thumbnail of white and blue tiles.
pub fn thumbnail() -> Frame {
    thumbnail_at(ColorDepth::ThreeBit)
}

pub fn thumbnail_at(depth: ColorDepth) -> Frame {
    let image = RgbImage::from_fn(128, 112, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 255])
        }
    });
    Frame::encode(&image, TileGrid::THUMBNAIL, depth).unwrap()
}

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};

use super::{Frame, TileGrid};
use crate::error::{Error, Result};
use crate::format::ColorDepth;

const PIXMAP_MAGIC: &[u8; 2] = b"P6";

/// Decodes a binary portable pixmap into RGB pixels.
pub fn decode_pixmap(bytes: &[u8]) -> Result<RgbImage> {
    let magic = bytes.get(..PIXMAP_MAGIC.len()).unwrap_or(bytes);
    if magic != PIXMAP_MAGIC {
        return Err(Error::BadMagic {
            what: "pixmap",
            expected: "P6".into(),
            found: String::from_utf8_lossy(magic).into_owned(),
        });
    }

    let image = image::load_from_memory_with_format(bytes, ImageFormat::Pnm)?;
    Ok(image.to_rgb8())
}

/// Reads the pixmap at `path` and encodes it as a frame on `grid`.
pub fn encode_pixmap_file(path: &Path, grid: TileGrid, depth: ColorDepth) -> Result<Frame> {
    let bytes = std::fs::read(path).map_err(Error::file(path))?;
    let image = decode_pixmap(&bytes)?;

    tracing::trace!("encoding {:?} as {}x{} tiles", path, grid.width, grid.height);
    Frame::encode(&image, grid, depth)
}

/// The `*.ppm` files of a directory in file-name order, encoded one at a
/// time as they are consumed.
#[derive(Debug, Clone)]
pub struct FrameDirectory {
    paths: Vec<PathBuf>,
    grid: TileGrid,
    depth: ColorDepth,
}

impl FrameDirectory {
    pub fn open(dir: &Path, grid: TileGrid, depth: ColorDepth) -> Result<Self> {
        let mut paths = std::fs::read_dir(dir)
            .map_err(Error::file(dir))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(Error::file(dir))?;

        paths.retain(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "ppm"));
        paths.sort();

        tracing::debug!("{} frames in {:?}", paths.len(), dir);
        Ok(Self { paths, grid, depth })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn frames(&self) -> impl ExactSizeIterator<Item = Result<Frame>> + '_ {
        self.paths
            .iter()
            .map(|path| encode_pixmap_file(path, self.grid, self.depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pixmap;

    #[test]
    fn decodes_binary_pixmap() {
        let image = decode_pixmap(&pixmap(16, 8, [10, 20, 30])).unwrap();
        assert_eq!(image.dimensions(), (16, 8));
        assert_eq!(image.get_pixel(15, 7).0, [10, 20, 30]);
    }

    #[test]
    fn rejects_other_magic() {
        let mut bytes = pixmap(8, 8, [0, 0, 0]);
        bytes[1] = b'3';
        assert!(matches!(
            decode_pixmap(&bytes),
            Err(Error::BadMagic { what: "pixmap", .. })
        ));
        assert!(matches!(
            decode_pixmap(b""),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn encodes_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_00001.ppm");
        std::fs::write(&path, pixmap(128, 112, [255, 0, 0])).unwrap();

        let frame = encode_pixmap_file(&path, TileGrid::THUMBNAIL, ColorDepth::ThreeBit).unwrap();
        assert_eq!(frame.palette[1], 0x00e);

        let missing = dir.path().join("missing.ppm");
        assert!(matches!(
            encode_pixmap_file(&missing, TileGrid::THUMBNAIL, ColorDepth::ThreeBit),
            Err(Error::File { .. })
        ));
    }

    #[test]
    fn frame_directory_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.ppm"), pixmap(256, 224, [0, 255, 0])).unwrap();
        std::fs::write(dir.path().join("a.ppm"), pixmap(256, 224, [255, 0, 0])).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let frames = FrameDirectory::open(dir.path(), TileGrid::FULLSCREEN, ColorDepth::ThreeBit).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.paths()[0].ends_with("a.ppm"));

        let encoded: Vec<Frame> = frames.frames().collect::<Result<_>>().unwrap();
        assert_eq!(encoded[0].palette[1], 0x00e);
        assert_eq!(encoded[1].palette[1], 0x0e0);
    }
}

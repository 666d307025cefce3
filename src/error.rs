use std::path::PathBuf;

use thiserror::Error;

use crate::format::ColorDepth;
use crate::rle::RleError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad magic in {what}: expected {expected:?}, found {found:?}")]
    BadMagic {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("unable to decode pixmap: {0}")]
    Pixmap(#[from] image::ImageError),

    #[error("image is {width}x{height} pixels, not a multiple of the 8x8 tile size")]
    NotTileAligned { width: u32, height: u32 },

    #[error("image covers {found_w}x{found_h} tiles, expected {expected_w}x{expected_h}")]
    GridMismatch {
        expected_w: u32,
        expected_h: u32,
        found_w: u32,
        found_h: u32,
    },

    #[error("frame needs more than 16 palette slots (color {color:#05x} at pixel {x},{y})")]
    PaletteOverflow { color: u16, x: u32, y: u32 },

    #[error("frame uses {found:?} color keys, the format version needs {expected:?}")]
    ColorDepthMismatch { expected: ColorDepth, found: ColorDepth },

    #[error("frame record is {found} bytes, expected {expected}")]
    FrameRecord { expected: usize, found: usize },

    #[error("catalog holds at most {max} entries, got {count}")]
    CatalogFull { count: usize, max: usize },

    #[error("{0:?} is outside the catalog directory")]
    OutsideCatalogRoot(PathBuf),

    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} value {value} does not fit the header field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("incompatible options: {0}")]
    IncompatibleOptions(String),

    #[error("streaming index overflow: chunk {chunk} needs more than {capacity} index entries")]
    IndexOverflow { chunk: usize, capacity: usize },

    #[error(transparent)]
    Rle(#[from] RleError),

    #[error("corrupt container: {0}")]
    Corrupt(String),

    #[error("{path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::File { path, source }
    }
}

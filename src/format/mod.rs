//! On-disk layout of the container.
//!
//! ```text
//! [HEADER]  8192 bytes, see [`header`]; thumbnail frame in the last 7200
//! [INDEX]   compressed containers only: INDEX_MAX_ENTRIES x u32 BE offsets
//! [CHUNKS]  chunk_count chunks, each a multiple of 256 bytes uncompressed
//! ```
//!
//! All integers are big-endian.

use clap::ValueEnum;

use crate::error::{Error, Result};

pub mod header;

pub use header::{ContainerHeader, HeaderLayout};

pub const FILE_MAGIC: &[u8; 16] = b"what nintendon't";

pub const HEADER_SIZE: usize = 8192;

/// Transfer unit of the playback hardware; every chunk boundary sits on it.
pub const CHUNK_ALIGNMENT: u64 = 256;

pub const TITLE_SIZE: usize = 128;
pub const RELATIVE_URL_SIZE: usize = 128;

/// Number of u32 entries in the streaming index table.
pub const INDEX_MAX_ENTRIES: usize = 36032;

/// Index value for entries past the end of the stream.
pub const EOF_OFFSET: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum)]
#[repr(u16)]
pub enum FormatVersion {
    /// u16 frame count, stream ends with an empty chunk
    #[value(name = "1")]
    V1 = 1,
    /// u32 frame count, last chunk carries the final flag
    #[value(name = "2")]
    V2 = 2,
    /// compression field and streaming index
    #[default]
    #[value(name = "3")]
    V3 = 3,
    /// 4-bit color keys, percent-encoded relative address
    #[value(name = "4")]
    V4 = 4,
}

impl TryFrom<u16> for FormatVersion {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            4 => Ok(FormatVersion::V4),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// How the end of the chunk stream is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// An extra chunk with no audio and no frames follows the last real one.
    EmptyChunk,
    /// The reserved field of the last chunk header is non-zero.
    FinalFlag,
    /// Only the header's chunk count (and the index end marker) says so.
    ChunkCount,
}

/// Precision used when reducing 8-bit channels to a palette color key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorDepth {
    ThreeBit,
    FourBit,
}

impl ColorDepth {
    /// Packs an RGB triple into the hardware's u16 color word.
    ///
    /// 3-bit keys land in the top three bits of each ABGR nibble, 4-bit keys
    /// fill the low three nibbles.
    pub fn color_key(self, r: u8, g: u8, b: u8) -> u16 {
        let (r, g, b) = (r as u16, g as u16, b as u16);
        match self {
            ColorDepth::ThreeBit => ((b / 32) << 9) | ((g / 32) << 5) | ((r / 32) << 1),
            ColorDepth::FourBit => ((b / 16) << 8) | ((g / 16) << 4) | (r / 16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlEncoding {
    Raw,
    Percent,
}

impl FormatVersion {
    pub fn number(self) -> u16 {
        self as u16
    }

    pub fn layout(self) -> HeaderLayout {
        HeaderLayout::of(self)
    }

    pub fn color_depth(self) -> ColorDepth {
        match self {
            FormatVersion::V1 | FormatVersion::V2 | FormatVersion::V3 => ColorDepth::ThreeBit,
            FormatVersion::V4 => ColorDepth::FourBit,
        }
    }

    pub fn url_encoding(self) -> UrlEncoding {
        match self {
            FormatVersion::V4 => UrlEncoding::Percent,
            _ => UrlEncoding::Raw,
        }
    }

    pub fn stream_end(self) -> StreamEnd {
        match self {
            FormatVersion::V1 => StreamEnd::EmptyChunk,
            FormatVersion::V2 => StreamEnd::FinalFlag,
            FormatVersion::V3 | FormatVersion::V4 => StreamEnd::ChunkCount,
        }
    }

    pub fn supports_compression(self) -> bool {
        self.layout().compression.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[repr(u16)]
pub enum Compression {
    #[default]
    None = 0,
    Rle = 1,
}

impl TryFrom<u16> for Compression {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Rle),
            other => Err(Error::Corrupt(format!("unknown compression mode {other}"))),
        }
    }
}

/// Bytes needed to bring `offset` up to the next multiple of [`CHUNK_ALIGNMENT`].
pub fn padding_to_alignment(offset: u64) -> u64 {
    (CHUNK_ALIGNMENT - offset % CHUNK_ALIGNMENT) % CHUNK_ALIGNMENT
}

/// Copies `text` into a NUL-padded field of `N` bytes, keeping at least one
/// terminator. Returns the field and whether `text` had to be cut.
pub fn fixed_field<const N: usize>(text: &str) -> ([u8; N], bool) {
    let mut end = text.len().min(N - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let mut field = [0u8; N];
    field[..end].copy_from_slice(&text.as_bytes()[..end]);
    (field, end < text.len())
}

/// Bytes of a NUL-padded field up to the first terminator.
pub fn field_bytes(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_bit_color_keys() {
        let depth = ColorDepth::ThreeBit;
        assert_eq!(depth.color_key(0, 0, 0), 0x000);
        assert_eq!(depth.color_key(255, 0, 0), 0x00e);
        assert_eq!(depth.color_key(0, 255, 0), 0x0e0);
        assert_eq!(depth.color_key(0, 0, 255), 0xe00);
        // Values inside the same 32-wide bucket collapse.
        assert_eq!(depth.color_key(64, 64, 64), depth.color_key(95, 95, 95));
    }

    #[test]
    fn four_bit_color_keys() {
        let depth = ColorDepth::FourBit;
        assert_eq!(depth.color_key(255, 255, 255), 0xfff);
        assert_eq!(depth.color_key(16, 32, 48), 0x321);
    }

    #[test]
    fn alignment_padding() {
        assert_eq!(padding_to_alignment(0), 0);
        assert_eq!(padding_to_alignment(12), 244);
        assert_eq!(padding_to_alignment(256), 0);
        assert_eq!(padding_to_alignment(8192 + 12), 244);
        assert_eq!(padding_to_alignment(257), 255);
    }

    #[test]
    fn fixed_fields_truncate_and_terminate() {
        let (field, cut) = fixed_field::<8>("abc");
        assert_eq!(&field, b"abc\0\0\0\0\0");
        assert!(!cut);

        let (field, cut) = fixed_field::<4>("abcdef");
        assert_eq!(&field, b"abc\0");
        assert!(cut);

        // Never splits a multi-byte character.
        let (field, cut) = fixed_field::<4>("aé");
        assert_eq!(field_bytes(&field), "aé".as_bytes());
        assert!(!cut);
        let (field, cut) = fixed_field::<3>("aé");
        assert_eq!(field_bytes(&field), b"a");
        assert!(cut);
    }

    #[test]
    fn versions_are_a_closed_set() {
        assert_eq!(FormatVersion::try_from(3).unwrap(), FormatVersion::V3);
        assert!(matches!(
            FormatVersion::try_from(5),
            Err(Error::UnsupportedVersion(5))
        ));
        assert!(!FormatVersion::V1.supports_compression());
        assert!(!FormatVersion::V2.supports_compression());
        assert!(FormatVersion::V4.supports_compression());
    }
}

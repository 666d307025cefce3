use core::mem::{offset_of, size_of};
use std::borrow::Cow;

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, U16, U32};

use super::{
    field_bytes, fixed_field, Compression, FormatVersion, FILE_MAGIC, HEADER_SIZE,
    RELATIVE_URL_SIZE, TITLE_SIZE,
};
use crate::error::{Error, Result};
use crate::tile::TileGrid;

pub const THUMBNAIL_SIZE: usize = TileGrid::THUMBNAIL.frame_size();
pub const THUMBNAIL_OFFSET: usize = HEADER_SIZE - THUMBNAIL_SIZE;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct HeaderV1 {
    magic: [u8; 16],
    format: U16<BigEndian>,
    fps: U16<BigEndian>,
    sample_rate: U16<BigEndian>,
    frame_count: U16<BigEndian>,
    sound_len: U32<BigEndian>,
    chunk_size: U32<BigEndian>,
    chunk_count: U32<BigEndian>,
    title: [u8; TITLE_SIZE],
    relative_url: [u8; RELATIVE_URL_SIZE],
    padding: [u8; 700],
    thumbnail: [u8; THUMBNAIL_SIZE],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct HeaderV2 {
    magic: [u8; 16],
    format: U16<BigEndian>,
    fps: U16<BigEndian>,
    sample_rate: U16<BigEndian>,
    frame_count: U32<BigEndian>,
    sound_len: U32<BigEndian>,
    chunk_size: U32<BigEndian>,
    chunk_count: U32<BigEndian>,
    title: [u8; TITLE_SIZE],
    relative_url: [u8; RELATIVE_URL_SIZE],
    padding: [u8; 698],
    thumbnail: [u8; THUMBNAIL_SIZE],
}

/// Shared by versions 3 and 4.
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct HeaderV3 {
    magic: [u8; 16],
    format: U16<BigEndian>,
    fps: U16<BigEndian>,
    sample_rate: U16<BigEndian>,
    frame_count: U32<BigEndian>,
    sound_len: U32<BigEndian>,
    chunk_size: U32<BigEndian>,
    chunk_count: U32<BigEndian>,
    title: [u8; TITLE_SIZE],
    relative_url: [u8; RELATIVE_URL_SIZE],
    compression: U16<BigEndian>,
    padding: [u8; 696],
    thumbnail: [u8; THUMBNAIL_SIZE],
}

const _: () = assert!(size_of::<HeaderV1>() == HEADER_SIZE);
const _: () = assert!(size_of::<HeaderV2>() == HEADER_SIZE);
const _: () = assert!(size_of::<HeaderV3>() == HEADER_SIZE);
const _: () = assert!(offset_of!(HeaderV1, thumbnail) == THUMBNAIL_OFFSET);

/// Byte offsets of the fields that get rewritten after the header is first
/// written: chunk geometry by the container builder, the relative address by
/// the catalog builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub relative_url: usize,
    pub compression: Option<usize>,
}

impl HeaderLayout {
    pub const fn of(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V1 => HeaderLayout {
                chunk_size: offset_of!(HeaderV1, chunk_size),
                chunk_count: offset_of!(HeaderV1, chunk_count),
                relative_url: offset_of!(HeaderV1, relative_url),
                compression: None,
            },
            FormatVersion::V2 => HeaderLayout {
                chunk_size: offset_of!(HeaderV2, chunk_size),
                chunk_count: offset_of!(HeaderV2, chunk_count),
                relative_url: offset_of!(HeaderV2, relative_url),
                compression: None,
            },
            FormatVersion::V3 | FormatVersion::V4 => HeaderLayout {
                chunk_size: offset_of!(HeaderV3, chunk_size),
                chunk_count: offset_of!(HeaderV3, chunk_count),
                relative_url: offset_of!(HeaderV3, relative_url),
                compression: Some(offset_of!(HeaderV3, compression)),
            },
        }
    }
}

/// Version-independent view of a container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: FormatVersion,
    pub fps: u16,
    pub sample_rate: u16,
    pub frame_count: u32,
    /// Total audio bytes, padded to a multiple of 256.
    pub sound_len: u32,
    /// Length of the first chunk; later chunks may be shorter.
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub title: [u8; TITLE_SIZE],
    pub relative_url: [u8; RELATIVE_URL_SIZE],
    pub compression: Compression,
    pub thumbnail: Vec<u8>,
}

impl ContainerHeader {
    pub fn title(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(field_bytes(&self.title))
    }

    pub fn relative_url(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(field_bytes(&self.relative_url))
    }

    /// Stores `title`, cutting it at a character boundary when it does not
    /// fit. Returns `true` if it was cut.
    pub fn set_title(&mut self, title: &str) -> bool {
        let (field, truncated) = fixed_field::<TITLE_SIZE>(title);
        self.title = field;
        truncated
    }

    /// Stores an already encoded relative address. Unlike the title, an
    /// address that does not fit is an error: a cut address points nowhere.
    pub fn set_relative_url(&mut self, encoded: &str) -> Result<()> {
        if encoded.len() >= RELATIVE_URL_SIZE {
            return Err(Error::FieldTooLong {
                field: "relative address",
                len: encoded.len(),
                max: RELATIVE_URL_SIZE - 1,
            });
        }
        self.relative_url = fixed_field::<RELATIVE_URL_SIZE>(encoded).0;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let thumbnail = <[u8; THUMBNAIL_SIZE]>::try_from(self.thumbnail.as_slice()).map_err(
            |_| Error::FrameRecord {
                expected: THUMBNAIL_SIZE,
                found: self.thumbnail.len(),
            },
        )?;

        if self.compression != Compression::None && !self.version.supports_compression() {
            return Err(Error::IncompatibleOptions(format!(
                "format version {} has no compression field",
                self.version.number()
            )));
        }

        let format = U16::new(self.version.number());
        let bytes = match self.version {
            FormatVersion::V1 => {
                let frame_count =
                    u16::try_from(self.frame_count).map_err(|_| Error::FieldOverflow {
                        field: "frame count",
                        value: self.frame_count as u64,
                    })?;

                HeaderV1 {
                    magic: *FILE_MAGIC,
                    format,
                    fps: self.fps.into(),
                    sample_rate: self.sample_rate.into(),
                    frame_count: frame_count.into(),
                    sound_len: self.sound_len.into(),
                    chunk_size: self.chunk_size.into(),
                    chunk_count: self.chunk_count.into(),
                    title: self.title,
                    relative_url: self.relative_url,
                    padding: [0; 700],
                    thumbnail,
                }
                .as_bytes()
                .to_vec()
            }
            FormatVersion::V2 => HeaderV2 {
                magic: *FILE_MAGIC,
                format,
                fps: self.fps.into(),
                sample_rate: self.sample_rate.into(),
                frame_count: self.frame_count.into(),
                sound_len: self.sound_len.into(),
                chunk_size: self.chunk_size.into(),
                chunk_count: self.chunk_count.into(),
                title: self.title,
                relative_url: self.relative_url,
                padding: [0; 698],
                thumbnail,
            }
            .as_bytes()
            .to_vec(),
            FormatVersion::V3 | FormatVersion::V4 => HeaderV3 {
                magic: *FILE_MAGIC,
                format,
                fps: self.fps.into(),
                sample_rate: self.sample_rate.into(),
                frame_count: self.frame_count.into(),
                sound_len: self.sound_len.into(),
                chunk_size: self.chunk_size.into(),
                chunk_count: self.chunk_count.into(),
                title: self.title,
                relative_url: self.relative_url,
                compression: (self.compression as u16).into(),
                padding: [0; 696],
                thumbnail,
            }
            .as_bytes()
            .to_vec(),
        };

        Ok(bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..HEADER_SIZE)
            .ok_or_else(|| Error::Corrupt(format!("header is only {} bytes", bytes.len())))?;

        check_magic(&bytes[..FILE_MAGIC.len()])?;
        let version = FormatVersion::try_from(u16::from_be_bytes([bytes[16], bytes[17]]))?;

        let header = match version {
            FormatVersion::V1 => {
                let h = HeaderV1::read_from_bytes(bytes).map_err(size_mismatch)?;
                ContainerHeader {
                    version,
                    fps: h.fps.get(),
                    sample_rate: h.sample_rate.get(),
                    frame_count: h.frame_count.get() as u32,
                    sound_len: h.sound_len.get(),
                    chunk_size: h.chunk_size.get(),
                    chunk_count: h.chunk_count.get(),
                    title: h.title,
                    relative_url: h.relative_url,
                    compression: Compression::None,
                    thumbnail: h.thumbnail.to_vec(),
                }
            }
            FormatVersion::V2 => {
                let h = HeaderV2::read_from_bytes(bytes).map_err(size_mismatch)?;
                ContainerHeader {
                    version,
                    fps: h.fps.get(),
                    sample_rate: h.sample_rate.get(),
                    frame_count: h.frame_count.get(),
                    sound_len: h.sound_len.get(),
                    chunk_size: h.chunk_size.get(),
                    chunk_count: h.chunk_count.get(),
                    title: h.title,
                    relative_url: h.relative_url,
                    compression: Compression::None,
                    thumbnail: h.thumbnail.to_vec(),
                }
            }
            FormatVersion::V3 | FormatVersion::V4 => {
                let h = HeaderV3::read_from_bytes(bytes).map_err(size_mismatch)?;
                ContainerHeader {
                    version,
                    fps: h.fps.get(),
                    sample_rate: h.sample_rate.get(),
                    frame_count: h.frame_count.get(),
                    sound_len: h.sound_len.get(),
                    chunk_size: h.chunk_size.get(),
                    chunk_count: h.chunk_count.get(),
                    title: h.title,
                    relative_url: h.relative_url,
                    compression: Compression::try_from(h.compression.get())?,
                    thumbnail: h.thumbnail.to_vec(),
                }
            }
        };

        Ok(header)
    }
}

// Lengths are checked before any struct read, so this only guards layout drift.
fn size_mismatch<E>(_: E) -> Error {
    Error::Corrupt("header size mismatch".into())
}

fn check_magic(found: &[u8]) -> Result<()> {
    if found != FILE_MAGIC {
        return Err(Error::BadMagic {
            what: "container header",
            expected: String::from_utf8_lossy(FILE_MAGIC).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }
    Ok(())
}

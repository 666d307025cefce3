use core::fmt::Debug;
use std::io::{Read, Write};

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, U16, U32};

use crate::error::{Error, Result};
use crate::format::{padding_to_alignment, ColorDepth, CHUNK_ALIGNMENT};
use crate::tile::{Frame, TileGrid};

pub const FRAME_SIZE: usize = TileGrid::FULLSCREEN.frame_size();

/// Chunk layout:
///
/// ```text
/// ChunkHeader (12 bytes)
/// pre_padding zero bytes     audio starts on a 256-byte boundary
/// audio_len bytes of PCM
/// frame_count frame records
/// post_padding zero bytes    next chunk starts on a 256-byte boundary
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ChunkHeader {
    pub audio_len: U32<BigEndian>,
    pub frame_count: U16<BigEndian>,
    /// Non-zero on the last chunk of a version 2 stream, zero otherwise.
    pub final_chunk: U16<BigEndian>,
    pub pre_padding: U16<BigEndian>,
    pub post_padding: U16<BigEndian>,
}

impl ChunkHeader {
    pub const SIZE: usize = 12;

    /// Full on-disk length of the chunk this header starts.
    pub fn span(&self) -> u64 {
        Self::SIZE as u64
            + self.pre_padding.get() as u64
            + self.audio_len.get() as u64
            + self.frame_count.get() as u64 * FRAME_SIZE as u64
            + self.post_padding.get() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.audio_len.get() == 0 && self.frame_count.get() == 0
    }

    pub fn is_final(&self) -> bool {
        self.final_chunk.get() != 0
    }

    fn layout(origin: u64, audio_len: u32, frame_count: u16, final_chunk: bool) -> Self {
        let header_end = origin + Self::SIZE as u64;
        let pre_padding = padding_to_alignment(header_end);
        let frames_end = header_end
            + pre_padding
            + audio_len as u64
            + frame_count as u64 * FRAME_SIZE as u64;
        let post_padding = padding_to_alignment(frames_end);

        Self {
            audio_len: audio_len.into(),
            frame_count: frame_count.into(),
            final_chunk: (final_chunk as u16).into(),
            pre_padding: (pre_padding as u16).into(),
            post_padding: (post_padding as u16).into(),
        }
    }
}

/// Counters threaded through the chunk loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCursor {
    pub audio_per_chunk: u32,
    pub frames_per_chunk: u16,
    /// Audio bytes left in the stream, trailing alignment padding included.
    pub audio_remaining: u32,
    /// Audio bytes the source still has to deliver.
    pub audio_data_remaining: u32,
    pub frames_remaining: u32,
    /// Length of the first chunk written, zero before that.
    pub chunk_size: u32,
    pub chunk_count: u32,
}

impl ChunkCursor {
    /// `audio_len` is the unpadded length of the audio source. The stream
    /// carries it rounded up to 256 bytes, so it must fit a `u32` once
    /// rounded.
    pub fn new(audio_per_chunk: u32, frames_per_chunk: u16, audio_len: u32, frame_count: u32) -> Self {
        Self {
            audio_per_chunk,
            frames_per_chunk,
            audio_remaining: audio_len.next_multiple_of(CHUNK_ALIGNMENT as u32),
            audio_data_remaining: audio_len,
            frames_remaining: frame_count,
            chunk_size: 0,
            chunk_count: 0,
        }
    }

    /// The stream continues while both audio and frames are left.
    pub fn has_more(&self) -> bool {
        self.audio_remaining > 0 && self.frames_remaining > 0
    }

    fn next_sizes(&self) -> (u32, u16) {
        let audio = self.audio_remaining.min(self.audio_per_chunk);
        let frames = self.frames_remaining.min(self.frames_per_chunk as u32) as u16;
        (audio, frames)
    }

    /// Counts a finished chunk; the first one fixes the canonical size.
    pub fn record_chunk(&mut self, len: u64) {
        if self.chunk_size == 0 {
            self.chunk_size = len as u32;
        }
        self.chunk_count += 1;
    }
}

/// Writes the next chunk of `cursor` to `writer` and returns its length.
///
/// `origin` is the offset of the chunk's first byte relative to the
/// alignment grid: its file offset when writing straight to the container,
/// zero when the chunk is buffered for compression. With `flag_last`, the
/// chunk that exhausts the audio or the frames gets its final flag set.
pub fn write_chunk<W, A, F>(
    mut writer: W,
    origin: u64,
    cursor: &mut ChunkCursor,
    audio: &mut A,
    frames: &mut F,
    flag_last: bool,
) -> Result<u64>
where
    W: Write,
    A: Read,
    F: Iterator<Item = Result<Frame>>,
{
    let (audio_len, frame_count) = cursor.next_sizes();
    let is_last = audio_len == cursor.audio_remaining || frame_count as u32 == cursor.frames_remaining;

    let chunk_frames = frames
        .by_ref()
        .take(frame_count as usize)
        .collect::<Result<Vec<_>>>()?;
    if chunk_frames.len() != frame_count as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "frame source ended after {} of {} frames in chunk {}",
                chunk_frames.len(),
                frame_count,
                cursor.chunk_count
            ),
        )
        .into());
    }

    let header = ChunkHeader::layout(origin, audio_len, frame_count, flag_last && is_last);
    writer.write_all(header.as_bytes())?;
    write_zeros(&mut writer, header.pre_padding.get() as u64)?;

    let data_len = audio_len.min(cursor.audio_data_remaining);
    let copied = std::io::copy(&mut audio.by_ref().take(data_len as u64), &mut writer)?;
    if copied < data_len as u64 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "audio source ended {} bytes early in chunk {}",
                cursor.audio_data_remaining as u64 - copied,
                cursor.chunk_count
            ),
        )
        .into());
    }
    write_zeros(&mut writer, (audio_len - data_len) as u64)?;

    for frame in &chunk_frames {
        if frame.grid != TileGrid::FULLSCREEN || frame.encoded_len() != FRAME_SIZE {
            return Err(Error::FrameRecord {
                expected: FRAME_SIZE,
                found: frame.encoded_len(),
            });
        }
        frame.write_to(&mut writer)?;
    }

    write_zeros(&mut writer, header.post_padding.get() as u64)?;

    cursor.audio_remaining -= audio_len;
    cursor.audio_data_remaining -= data_len;
    cursor.frames_remaining -= frame_count as u32;

    let span = header.span();
    debug_assert_eq!((origin + span) % CHUNK_ALIGNMENT, 0);
    Ok(span)
}

/// Writes a chunk with no audio and no frames, used as an end marker.
pub fn write_empty_chunk(mut writer: impl Write, origin: u64) -> Result<u64> {
    let header = ChunkHeader::layout(origin, 0, 0, false);
    writer.write_all(header.as_bytes())?;
    write_zeros(&mut writer, header.pre_padding.get() as u64)?;
    write_zeros(&mut writer, header.post_padding.get() as u64)?;
    Ok(header.span())
}

fn write_zeros(writer: &mut impl Write, count: u64) -> std::io::Result<()> {
    std::io::copy(&mut std::io::repeat(0).take(count), writer).map(|_| ())
}

/// A chunk read back from a container.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedChunk {
    pub header: ChunkHeader,
    pub audio: Vec<u8>,
    pub frames: Vec<Frame>,
}

impl DecodedChunk {
    /// Parses the chunk at the start of `bytes`; returns it with its length.
    pub fn parse(bytes: &[u8], depth: ColorDepth) -> Result<(Self, usize)> {
        let (header, _) = ChunkHeader::read_from_prefix(bytes)
            .map_err(|_| Error::Corrupt(format!("chunk header needs 12 bytes, got {}", bytes.len())))?;

        let span = header.span() as usize;
        if span % CHUNK_ALIGNMENT as usize != 0 {
            return Err(Error::Corrupt(format!("chunk length {span} is not 256-byte aligned")));
        }
        if span > bytes.len() {
            return Err(Error::Corrupt(format!(
                "chunk claims {span} bytes, only {} available",
                bytes.len()
            )));
        }

        let audio_start = ChunkHeader::SIZE + header.pre_padding.get() as usize;
        let frames_start = audio_start + header.audio_len.get() as usize;
        let audio = bytes[audio_start..frames_start].to_vec();

        let frames = bytes[frames_start..]
            .chunks_exact(FRAME_SIZE)
            .take(header.frame_count.get() as usize)
            .map(|record| Frame::from_bytes(record, TileGrid::FULLSCREEN, depth))
            .collect::<Result<Vec<_>>>()?;

        Ok((
            Self {
                header,
                audio,
                frames,
            },
            span,
        ))
    }
}

impl Debug for DecodedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedChunk")
            .field("header", &self.header)
            .field("audio.len()", &self.audio.len())
            .field("frames.len()", &self.frames.len())
            .finish()
    }
}

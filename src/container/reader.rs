use std::io::{Read, Seek, SeekFrom};

use zerocopy::{FromBytes, IntoBytes};

use super::StreamingIndex;
use crate::chunk::{ChunkHeader, DecodedChunk};
use crate::error::{Error, Result};
use crate::format::{Compression, ContainerHeader, StreamEnd, EOF_OFFSET, HEADER_SIZE};
use crate::tile::{Frame, TileGrid};

/// Totals gathered by [`ContainerReader::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub chunks: u32,
    pub frames: u64,
    pub audio_bytes: u64,
    /// Offset just past the chunk stream, terminator chunk included.
    pub end_offset: u64,
}

#[derive(Debug)]
pub struct ContainerReader<R> {
    reader: R,
    header: ContainerHeader,
    index: Option<StreamingIndex>,
    chunks_start: u64,
    next_chunk: u32,
    next_offset: u64,
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;

        let mut bytes = vec![0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes).map_err(truncated("header"))?;
        let header = ContainerHeader::parse(&bytes)?;

        let index = match header.compression {
            Compression::None => None,
            _ => Some(read_index(&mut reader)?),
        };
        if let Some(index) = &index {
            if index.len() != header.chunk_count as usize {
                return Err(Error::Corrupt(format!(
                    "index lists {} chunks, header says {}",
                    index.len(),
                    header.chunk_count
                )));
            }
        }

        let chunks_start = HEADER_SIZE as u64 + index.as_ref().map_or(0, |i| i.byte_len() as u64);
        Ok(Self {
            reader,
            header,
            index,
            chunks_start,
            next_chunk: 0,
            next_offset: chunks_start,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn index(&self) -> Option<&StreamingIndex> {
        self.index.as_ref()
    }

    pub fn thumbnail(&self) -> Result<Frame> {
        let depth = self.header.version.color_depth();
        Frame::from_bytes(&self.header.thumbnail, TileGrid::THUMBNAIL, depth)
    }

    /// Starts [`ContainerReader::next_chunk`] over from the first chunk.
    pub fn rewind(&mut self) {
        self.next_chunk = 0;
        self.next_offset = self.chunks_start;
    }

    pub fn next_chunk(&mut self) -> Result<Option<DecodedChunk>> {
        if self.next_chunk >= self.header.chunk_count {
            return Ok(None);
        }

        let (chunk, stored) = match self.index {
            Some(_) => self.read_compressed(self.next_chunk)?,
            None => self.read_plain(self.next_offset)?,
        };

        self.next_chunk += 1;
        self.next_offset += stored;
        Ok(Some(chunk))
    }

    /// Reads chunk number `chunk`. Compressed containers seek straight to
    /// it through the index; uncompressed ones walk the chunk headers.
    pub fn read_chunk(&mut self, chunk: u32) -> Result<DecodedChunk> {
        if chunk >= self.header.chunk_count {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("chunk {chunk} requested, container has {}", self.header.chunk_count),
            )
            .into());
        }

        if self.index.is_some() {
            return self.read_compressed(chunk).map(|(chunk, _)| chunk);
        }

        let mut offset = self.chunks_start;
        for _ in 0..chunk {
            offset += self.read_chunk_header(offset)?.span();
        }
        self.read_plain(offset).map(|(chunk, _)| chunk)
    }

    fn read_chunk_header(&mut self, offset: u64) -> Result<ChunkHeader> {
        let mut header = [0u8; ChunkHeader::SIZE];
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader
            .read_exact(&mut header)
            .map_err(truncated("chunk header"))?;

        ChunkHeader::read_from_bytes(&header)
            .map_err(|_| Error::Corrupt(format!("unreadable chunk header at {offset}")))
    }

    fn check_span(&self, span: u64, at: u64) -> Result<()> {
        if span > self.header.chunk_size as u64 {
            return Err(Error::Corrupt(format!(
                "chunk at {at} is {span} bytes, larger than the {} byte chunk size",
                self.header.chunk_size
            )));
        }
        Ok(())
    }

    fn read_plain(&mut self, offset: u64) -> Result<(DecodedChunk, u64)> {
        let header = self.read_chunk_header(offset)?;
        let span = header.span();
        self.check_span(span, offset)?;

        let mut bytes = vec![0u8; span as usize];
        bytes[..ChunkHeader::SIZE].copy_from_slice(header.as_bytes());
        self.reader
            .read_exact(&mut bytes[ChunkHeader::SIZE..])
            .map_err(truncated("chunk"))?;

        let (chunk, _) = DecodedChunk::parse(&bytes, self.header.version.color_depth())?;
        Ok((chunk, span))
    }

    fn read_compressed(&mut self, chunk: u32) -> Result<(DecodedChunk, u64)> {
        let (start, end) = self
            .index
            .as_ref()
            .and_then(|index| index.span(chunk as usize))
            .ok_or_else(|| Error::Corrupt(format!("index has no span for chunk {chunk}")))?;

        let mut stored = vec![0u8; (end - start) as usize];
        self.reader.seek(SeekFrom::Start(start))?;
        self.reader
            .read_exact(&mut stored)
            .map_err(truncated("compressed chunk"))?;

        let raw = self.header.compression.decompress(&stored)?;
        let (decoded, span) = DecodedChunk::parse(&raw, self.header.version.color_depth())?;
        if span != raw.len() {
            return Err(Error::Corrupt(format!(
                "chunk {chunk} decompresses to {} bytes but declares {span}",
                raw.len()
            )));
        }
        self.check_span(span as u64, start)?;

        Ok((decoded, end - start))
    }

    /// Reads every chunk and checks the stream against the header and the
    /// end-of-stream convention of its format version.
    pub fn verify(&mut self) -> Result<StreamReport> {
        self.rewind();
        let mut report = StreamReport::default();
        let stream_end = self.header.version.stream_end();
        let last = self.header.chunk_count.checked_sub(1);

        while let Some(chunk) = self.next_chunk()? {
            let number = report.chunks;

            if number == 0 {
                let first = chunk.header.span();
                if first != self.header.chunk_size as u64 {
                    return Err(Error::Corrupt(format!(
                        "first chunk is {first} bytes, header says {}",
                        self.header.chunk_size
                    )));
                }
            }

            let expect_flag = stream_end == StreamEnd::FinalFlag && Some(number) == last;
            if chunk.header.is_final() != expect_flag {
                return Err(Error::Corrupt(format!(
                    "chunk {number} final flag is {}, expected {expect_flag}",
                    chunk.header.final_chunk.get()
                )));
            }

            report.chunks += 1;
            report.frames += chunk.frames.len() as u64;
            report.audio_bytes += chunk.audio.len() as u64;
        }

        // The stream stops as soon as either source is exhausted, so one of
        // the header totals is reached exactly and neither is exceeded.
        let frames = self.header.frame_count as u64;
        let sound = self.header.sound_len as u64;
        if report.frames > frames
            || report.audio_bytes > sound
            || (report.frames < frames && report.audio_bytes < sound)
        {
            return Err(Error::Corrupt(format!(
                "stream holds {} frames and {} audio bytes, header says {frames} and {sound}",
                report.frames, report.audio_bytes
            )));
        }

        report.end_offset = match &self.index {
            Some(index) => index
                .end()
                .ok_or_else(|| Error::Corrupt("index has no end marker".into()))?,
            None => self.next_offset,
        };

        if stream_end == StreamEnd::EmptyChunk {
            let terminator = self.read_chunk_header(report.end_offset)?;
            if !terminator.is_empty() {
                return Err(Error::Corrupt(format!(
                    "expected an empty chunk at {}, found {} audio bytes and {} frames",
                    report.end_offset,
                    terminator.audio_len.get(),
                    terminator.frame_count.get()
                )));
            }
            report.end_offset += terminator.span();
        }

        let file_len = self.reader.seek(SeekFrom::End(0))?;
        if file_len != report.end_offset {
            return Err(Error::Corrupt(format!(
                "chunk stream ends at {}, file is {file_len} bytes",
                report.end_offset
            )));
        }

        tracing::debug!(
            "verified {} chunks, {} frames, {} audio bytes",
            report.chunks,
            report.frames,
            report.audio_bytes
        );
        Ok(report)
    }
}

/// Reads the index table that follows the header. Its first entry is the
/// offset of the first chunk, so it also gives the table's size.
fn read_index(reader: &mut impl Read) -> Result<StreamingIndex> {
    let mut first = [0u8; 4];
    reader.read_exact(&mut first).map_err(truncated("index"))?;

    let first_offset = u32::from_be_bytes(first) as usize;
    let table_len = first_offset.wrapping_sub(HEADER_SIZE);
    if first_offset as u32 == EOF_OFFSET || first_offset < HEADER_SIZE + 4 || table_len % 4 != 0 {
        return Err(Error::Corrupt(format!(
            "first index entry {first_offset:#x} does not point past the index"
        )));
    }

    let mut table = vec![0u8; table_len];
    table[..4].copy_from_slice(&first);
    reader
        .read_exact(&mut table[4..])
        .map_err(truncated("index"))?;

    StreamingIndex::parse(&table)
}

fn truncated(what: &'static str) -> impl FnOnce(std::io::Error) -> Error {
    move |e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::Corrupt(format!("file ends inside the {what}")),
        _ => Error::Io(e),
    }
}

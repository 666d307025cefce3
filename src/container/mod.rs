//! Container assembly: header, optional streaming index, chunk stream.
//!
//! Fields that depend on the whole stream are written as placeholders and
//! rewritten through a [`PatchSink`] after the last chunk.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tap::Pipe;

use crate::chunk::{write_chunk, write_empty_chunk, ChunkCursor};
use crate::error::{Error, Result};
use crate::format::{
    Compression, ContainerHeader, FormatVersion, StreamEnd, CHUNK_ALIGNMENT, HEADER_SIZE,
    INDEX_MAX_ENTRIES, RELATIVE_URL_SIZE, TITLE_SIZE,
};
use crate::tile::{Frame, TileGrid};

mod compression;
mod index;
mod reader;
mod sink;

pub use index::StreamingIndex;
pub use reader::{ContainerReader, StreamReport};
pub use sink::{PatchSink, Patches};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    pub title: String,
    pub fps: u16,
    pub sample_rate: u16,
    /// Seconds of playback per chunk.
    pub chunk_seconds: u16,
    pub compression: Compression,
    pub version: FormatVersion,
    pub index_capacity: usize,
    /// Write an SGDK `.res` declaration next to the container.
    pub resource_file: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            fps: 10,
            sample_rate: 13312,
            chunk_seconds: 3,
            compression: Compression::None,
            version: FormatVersion::default(),
            index_capacity: INDEX_MAX_ENTRIES,
            resource_file: false,
        }
    }
}

impl ContainerConfig {
    pub fn audio_per_chunk(&self) -> u32 {
        self.sample_rate as u32 * self.chunk_seconds as u32
    }

    pub fn frames_per_chunk(&self) -> Result<u16> {
        let frames = self.fps as u32 * self.chunk_seconds as u32;
        u16::try_from(frames).map_err(|_| Error::FieldOverflow {
            field: "frames per chunk",
            value: frames as u64,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio_per_chunk() == 0 || self.frames_per_chunk()? == 0 {
            return Err(Error::IncompatibleOptions(format!(
                "chunks of {} s at {} fps and {} Hz hold no data",
                self.chunk_seconds, self.fps, self.sample_rate
            )));
        }
        if self.compression != Compression::None && !self.version.supports_compression() {
            return Err(Error::IncompatibleOptions(format!(
                "format version {} does not support compression",
                self.version.number()
            )));
        }
        if self.compression != Compression::None && self.resource_file {
            return Err(Error::IncompatibleOptions(
                "resource files are only generated for uncompressed containers".into(),
            ));
        }
        if self.compression != Compression::None && self.index_capacity < 2 {
            return Err(Error::IncompatibleOptions(format!(
                "index capacity {} leaves no room for chunks",
                self.index_capacity
            )));
        }
        Ok(())
    }
}

/// What a finished build wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub chunk_count: u32,
    pub chunk_size: u32,
    pub frame_count: u32,
    pub sound_len: u32,
    /// Offset just past the last byte of the chunk stream.
    pub end_offset: u64,
}

/// Writes a container in three steps: [`ContainerBuilder::begin`] emits the
/// header with placeholders, [`ContainerBuilder::stream`] the chunks, and
/// [`ContainerBuilder::finish`] patches the placeholders.
#[derive(Debug)]
pub struct ContainerBuilder<S> {
    sink: S,
    version: FormatVersion,
    compression: Compression,
    header: ContainerHeader,
    cursor: ChunkCursor,
    index: Option<StreamingIndex>,
}

impl<S: PatchSink> ContainerBuilder<S> {
    /// `sound_len` is the unpadded length of the audio that will be
    /// streamed; the header records it rounded up to 256 bytes.
    pub fn begin(
        mut sink: S,
        config: &ContainerConfig,
        thumbnail: &Frame,
        sound_len: u64,
        frame_count: u32,
    ) -> Result<Self> {
        config.validate()?;

        if thumbnail.grid != TileGrid::THUMBNAIL {
            return Err(Error::GridMismatch {
                expected_w: TileGrid::THUMBNAIL.width,
                expected_h: TileGrid::THUMBNAIL.height,
                found_w: thumbnail.grid.width,
                found_h: thumbnail.grid.height,
            });
        }
        thumbnail.check_depth(config.version.color_depth())?;

        let padded = sound_len.next_multiple_of(CHUNK_ALIGNMENT);
        let padded_len = u32::try_from(padded).map_err(|_| Error::FieldOverflow {
            field: "sound length",
            value: padded,
        })?;
        // Fits as well, it is no longer than its rounded length.
        let audio_len = sound_len as u32;

        let mut header = ContainerHeader {
            version: config.version,
            fps: config.fps,
            sample_rate: config.sample_rate,
            frame_count,
            sound_len: padded_len,
            chunk_size: 0,
            chunk_count: 0,
            title: [0; TITLE_SIZE],
            relative_url: [0; RELATIVE_URL_SIZE],
            compression: config.compression,
            thumbnail: thumbnail.to_bytes(),
        };
        if header.set_title(&config.title) {
            tracing::warn!("title {:?} truncated to {:?}", config.title, header.title());
        }

        let start = sink.position()?;
        if start != 0 {
            return Err(Error::IncompatibleOptions(format!(
                "container must start at offset 0 of its output, not {start}"
            )));
        }
        sink.write_all(&header.to_bytes()?)?;

        let index = match config.compression {
            Compression::None => None,
            _ => {
                let index = StreamingIndex::new(config.index_capacity);
                sink.write_all(&index.to_bytes())?;
                Some(index)
            }
        };

        let cursor = ChunkCursor::new(
            config.audio_per_chunk(),
            config.frames_per_chunk()?,
            audio_len,
            frame_count,
        );

        Ok(Self {
            sink,
            version: config.version,
            compression: config.compression,
            header,
            cursor,
            index,
        })
    }

    /// Writes chunks until either the audio or the frames run out. Frames
    /// must use the color depth of the container's format version.
    pub fn stream<A, F>(&mut self, audio: &mut A, frames: &mut F) -> Result<()>
    where
        A: Read,
        F: Iterator<Item = Result<Frame>>,
    {
        let flag_last = self.version.stream_end() == StreamEnd::FinalFlag;
        let depth = self.version.color_depth();
        let mut frames = frames.map(|frame| {
            frame.and_then(|frame| frame.check_depth(depth).map(|()| frame))
        });

        while self.cursor.has_more() {
            let start = self.sink.position()?;

            let (len, stored) = match self.index.as_mut() {
                None => {
                    let len = write_chunk(&mut self.sink, start, &mut self.cursor, audio, &mut frames, flag_last)?;
                    (len, len)
                }
                Some(index) => {
                    index.push(start)?;

                    let mut buffer = Vec::with_capacity(self.cursor.chunk_size as usize);
                    let len = write_chunk(&mut buffer, 0, &mut self.cursor, audio, &mut frames, flag_last)?;
                    let packed = self.compression.compress(&buffer);
                    self.sink.write_all(&packed)?;
                    (len, packed.len() as u64)
                }
            };

            tracing::debug!(
                "chunk {} at {}: {} bytes ({} stored), {} frames left",
                self.cursor.chunk_count,
                start,
                len,
                stored,
                self.cursor.frames_remaining
            );
            self.cursor.record_chunk(len);
        }

        Ok(())
    }

    /// Ends the stream and rewrites the placeholders. Returns the sink.
    pub fn finish(mut self) -> Result<(S, BuildSummary)> {
        if self.cursor.frames_remaining > 0 || self.cursor.audio_remaining > 0 {
            tracing::warn!(
                "stream ended with {} frames and {} audio bytes unused",
                self.cursor.frames_remaining,
                self.cursor.audio_remaining
            );
        }

        if self.version.stream_end() == StreamEnd::EmptyChunk {
            let start = self.sink.position()?;
            write_empty_chunk(&mut self.sink, start)?;
        }

        let end_offset = self.sink.position()?;
        let layout = self.version.layout();

        let mut patches = Patches::default();
        patches.push_u32(layout.chunk_size as u64, self.cursor.chunk_size);
        patches.push_u32(layout.chunk_count as u64, self.cursor.chunk_count);
        if let Some(index) = self.index.as_mut() {
            index.finish(end_offset)?;
            patches.push(HEADER_SIZE as u64, index.to_bytes());
        }
        patches.apply(&mut self.sink)?;

        self.header.chunk_size = self.cursor.chunk_size;
        self.header.chunk_count = self.cursor.chunk_count;

        let summary = BuildSummary {
            chunk_count: self.cursor.chunk_count,
            chunk_size: self.cursor.chunk_size,
            frame_count: self.header.frame_count,
            sound_len: self.header.sound_len,
            end_offset,
        };
        tracing::info!(
            "container {:?} complete: {} chunks of up to {} bytes, {} bytes total",
            self.header.title(),
            summary.chunk_count,
            summary.chunk_size,
            summary.end_offset
        );

        Ok((self.sink, summary))
    }
}

/// Runs all three build steps over `sink`.
pub fn build_container<S, A, I>(
    sink: S,
    config: &ContainerConfig,
    thumbnail: &Frame,
    mut audio: A,
    sound_len: u64,
    frames: I,
) -> Result<(S, BuildSummary)>
where
    S: PatchSink,
    A: Read,
    I: IntoIterator<Item = Result<Frame>>,
    I::IntoIter: ExactSizeIterator,
{
    let mut frames = frames.into_iter();
    let frame_count = u32::try_from(frames.len()).map_err(|_| Error::FieldOverflow {
        field: "frame count",
        value: frames.len() as u64,
    })?;

    let mut builder = ContainerBuilder::begin(sink, config, thumbnail, sound_len, frame_count)?;
    builder.stream(&mut audio, &mut frames)?;
    builder.finish()
}

/// Builds the container at `output` from the raw PCM at `audio`. The output
/// is removed again if the build fails.
pub fn build_container_file<I>(
    output: &Path,
    config: &ContainerConfig,
    thumbnail: &Frame,
    audio: &Path,
    frames: I,
) -> Result<BuildSummary>
where
    I: IntoIterator<Item = Result<Frame>>,
    I::IntoIter: ExactSizeIterator,
{
    config.validate()?;

    let audio_file = File::open(audio).map_err(Error::file(audio))?;
    let sound_len = audio_file.metadata().map_err(Error::file(audio))?.len();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(Error::file(parent))?;
    }
    let sink = File::create(output)
        .map_err(Error::file(output))?
        .pipe(BufWriter::new);

    let built = build_container(
        sink,
        config,
        thumbnail,
        std::io::BufReader::new(audio_file),
        sound_len,
        frames,
    )
    .and_then(|(mut sink, summary)| {
        sink.flush()?;
        Ok(summary)
    })
    .and_then(|summary| {
        if config.resource_file {
            crate::tilemap::write_resource_file(output)?;
        }
        Ok(summary)
    });

    built.inspect_err(|_| remove_partial(output))
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("unable to remove partial output {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;
    use crate::chunk::{ChunkHeader, FRAME_SIZE};
    use crate::format::header::THUMBNAIL_OFFSET;
    use crate::format::ColorDepth;
    use crate::testutil::{solid_frame, solid_frame_at, thumbnail, thumbnail_at};
    use zerocopy::FromBytes;

    fn config(version: FormatVersion, compression: Compression) -> ContainerConfig {
        ContainerConfig {
            title: "Test Pattern".into(),
            fps: 2,
            sample_rate: 300,
            chunk_seconds: 1,
            compression,
            version,
            ..ContainerConfig::default()
        }
    }

    fn frames(n: usize) -> Vec<Result<Frame>> {
        (0..n).map(|i| Ok(solid_frame([(i * 40) as u8, 255, 0]))).collect()
    }

    fn build(config: &ContainerConfig, sound_len: usize, frame_count: usize) -> (Vec<u8>, BuildSummary) {
        let audio: Vec<u8> = (0..sound_len).map(|i| i as u8).collect();
        let (sink, summary) = build_container(
            Cursor::new(vec![]),
            config,
            &thumbnail(),
            &audio[..],
            sound_len as u64,
            frames(frame_count),
        )
        .unwrap();
        (sink.into_inner(), summary)
    }

    #[test]
    fn default_config() {
        let config = ContainerConfig::default();
        assert_eq!(config.audio_per_chunk(), 39936);
        assert_eq!(config.frames_per_chunk().unwrap(), 30);
        assert_eq!(config.version, FormatVersion::V3);
        assert_eq!(config.index_capacity, 36032);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_conflicting_options() {
        let mut config = config(FormatVersion::V2, Compression::Rle);
        assert!(matches!(config.validate(), Err(Error::IncompatibleOptions(_))));

        config.version = FormatVersion::V3;
        config.resource_file = true;
        assert!(matches!(config.validate(), Err(Error::IncompatibleOptions(_))));

        config.resource_file = false;
        config.fps = 0;
        assert!(matches!(config.validate(), Err(Error::IncompatibleOptions(_))));
    }

    #[test]
    fn header_patch_matches_chunks() {
        let config = config(FormatVersion::V3, Compression::None);
        // 700 bytes of audio pad to 768: chunks of 300, 300, 168 audio bytes.
        let (bytes, summary) = build(&config, 700, 5);

        let header = ContainerHeader::parse(&bytes).unwrap();
        assert_eq!(header.sound_len, 768);
        assert_eq!(header.frame_count, 5);
        assert_eq!(header.chunk_count, 3);
        assert_eq!(header.chunk_size, summary.chunk_size);
        assert_eq!(header.title(), "Test Pattern");
        assert_eq!(header.thumbnail, bytes[THUMBNAIL_OFFSET..HEADER_SIZE]);

        // Walk the chunk headers: lengths sum to the end of the file.
        let mut offset = HEADER_SIZE;
        let mut lengths = vec![];
        for _ in 0..header.chunk_count {
            let (chunk, _) = ChunkHeader::read_from_prefix(&bytes[offset..]).unwrap();
            assert_eq!(chunk.span() % 256, 0);
            lengths.push(chunk.span());
            offset += chunk.span() as usize;
        }
        assert_eq!(offset, bytes.len());
        assert_eq!(offset as u64, summary.end_offset);
        assert_eq!(lengths[0], header.chunk_size as u64);
        assert!(lengths[2] < lengths[0]);

        // 12 + 244 + 300 + 2 frames, rounded up to the stride.
        let expected = (12 + 244 + 300 + 2 * FRAME_SIZE as u64).next_multiple_of(256);
        assert_eq!(lengths[0], expected);
    }

    #[test]
    fn compressed_chunks_are_indexed() {
        let config = config(FormatVersion::V3, Compression::Rle);
        let (bytes, summary) = build(&config, 600, 4);

        let header = ContainerHeader::parse(&bytes).unwrap();
        assert_eq!(header.compression, Compression::Rle);
        assert_eq!(header.chunk_count, 2);

        let table = &bytes[HEADER_SIZE..HEADER_SIZE + INDEX_MAX_ENTRIES * 4];
        let index = StreamingIndex::parse(table).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.span(0).unwrap().0, (HEADER_SIZE + INDEX_MAX_ENTRIES * 4) as u64);
        assert_eq!(index.end(), Some(bytes.len() as u64));
        assert_eq!(summary.end_offset, bytes.len() as u64);

        // Each chunk decodes on its own and starts with its 12-byte header.
        for chunk in 0..2 {
            let (start, end) = index.span(chunk).unwrap();
            let raw = Compression::Rle
                .decompress(&bytes[start as usize..end as usize])
                .unwrap();
            let (chunk_header, _) = ChunkHeader::read_from_prefix(&raw).unwrap();
            assert_eq!(chunk_header.span() as usize, raw.len());
            assert_eq!(chunk_header.pre_padding.get(), 244);
        }
    }

    #[test]
    fn small_index_overflows() {
        let mut config = config(FormatVersion::V3, Compression::Rle);
        config.index_capacity = 3;

        let audio = vec![0u8; 1500];
        let err = build_container(
            Cursor::new(vec![]),
            &config,
            &thumbnail(),
            &audio[..],
            1500,
            frames(10),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexOverflow { chunk: 2, capacity: 3 }));
    }

    #[test]
    fn version_one_appends_empty_chunk() {
        let config = config(FormatVersion::V1, Compression::None);
        let (bytes, summary) = build(&config, 512, 3);

        let header = ContainerHeader::parse(&bytes).unwrap();
        assert_eq!(header.chunk_count, 2);

        let last = &bytes[bytes.len() - 256..];
        let (terminator, _) = ChunkHeader::read_from_prefix(last).unwrap();
        assert!(terminator.is_empty());
        assert_eq!(terminator.span(), 256);
        assert_eq!(summary.end_offset, bytes.len() as u64);
    }

    #[test]
    fn version_two_flags_only_the_last_chunk() {
        let config = config(FormatVersion::V2, Compression::None);
        // Frames run out on the fifth chunk, before the audio does.
        let (bytes, _) = build(&config, 1400, 10);

        let mut offset = HEADER_SIZE;
        let mut flags = vec![];
        while offset < bytes.len() {
            let (chunk, _) = ChunkHeader::read_from_prefix(&bytes[offset..]).unwrap();
            flags.push(chunk.is_final());
            offset += chunk.span() as usize;
        }
        assert_eq!(flags, [false, false, false, false, true]);
    }

    #[test]
    fn stream_stops_when_frames_run_out() {
        let config = config(FormatVersion::V3, Compression::None);
        let (bytes, summary) = build(&config, 3000, 2);
        assert_eq!(summary.chunk_count, 1);
        assert_eq!(ContainerHeader::parse(&bytes).unwrap().chunk_count, 1);
    }

    #[test]
    fn short_audio_source_fails() {
        let config = config(FormatVersion::V3, Compression::None);
        let err = build_container(
            Cursor::new(vec![]),
            &config,
            &thumbnail(),
            &[1u8; 10][..],
            1000,
            frames(4),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn frames_must_match_version_depth() {
        let config = config(FormatVersion::V4, Compression::Rle);

        let err = ContainerBuilder::begin(Cursor::new(vec![]), &config, &thumbnail(), 600, 2).unwrap_err();
        assert!(matches!(err, Error::ColorDepthMismatch { expected: ColorDepth::FourBit, .. }));

        let err = build_container(
            Cursor::new(vec![]),
            &config,
            &thumbnail_at(ColorDepth::FourBit),
            &[0u8; 600][..],
            600,
            frames(2),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ColorDepthMismatch { found: ColorDepth::ThreeBit, .. }));

        let source: Vec<_> = (0..2).map(|_| Ok(solid_frame_at(ColorDepth::FourBit, [0, 0, 255]))).collect();
        let (_, summary) = build_container(
            Cursor::new(vec![]),
            &config,
            &thumbnail_at(ColorDepth::FourBit),
            &[0u8; 600][..],
            600,
            source,
        )
        .unwrap();
        assert_eq!(summary.chunk_count, 1);
    }

    #[test]
    fn must_start_at_offset_zero() {
        let config = config(FormatVersion::V3, Compression::None);
        let mut sink = Cursor::new(vec![0u8; 4]);
        sink.seek(SeekFrom::End(0)).unwrap();
        assert!(ContainerBuilder::begin(sink, &config, &thumbnail(), 0, 0).is_err());
    }

    #[test]
    fn failed_file_build_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("sound.pcm");
        std::fs::write(&audio, [0u8; 600]).unwrap();
        let output = dir.path().join("out").join("video.segavideo");

        let config = config(FormatVersion::V3, Compression::None);
        let mut source = frames(3);
        source[2] = Err(Error::Corrupt("bad frame".into()));

        let err = build_container_file(&output, &config, &thumbnail(), &audio, source).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert!(!output.exists());
    }

    #[test]
    fn file_build_writes_resource_file() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("sound.pcm");
        std::fs::write(&audio, [0u8; 600]).unwrap();
        let output = dir.path().join("my-video.segavideo");

        let mut config = config(FormatVersion::V3, Compression::None);
        config.resource_file = true;

        let summary = build_container_file(&output, &config, &thumbnail(), &audio, frames(4)).unwrap();
        assert_eq!(std::fs::metadata(&output).unwrap().len(), summary.end_offset);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("my-video.res")).unwrap(),
            "BIN my_video my-video.segavideo 256\n"
        );
    }
}

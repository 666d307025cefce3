use std::fs::File;
use std::path::Path;

use segavideo_packer::catalog::{build_catalog_file, read_catalog, CATALOG_FILE_NAME};
use segavideo_packer::container::{build_container_file, ContainerConfig, ContainerReader};
use segavideo_packer::format::{Compression, FormatVersion};
use segavideo_packer::tile::{encode_pixmap_file, FrameDirectory, TileGrid};

fn write_pixmap(path: &Path, width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) {
    let mut bytes = format!("P6\n{width} {height}\n255\n").into_bytes();
    for y in 0..height {
        for x in 0..width {
            bytes.extend_from_slice(&pixel(x, y));
        }
    }
    std::fs::write(path, bytes).unwrap();
}

fn encode_video(dir: &Path, name: &str, title: &str, version: FormatVersion, compression: Compression) {
    let frames_dir = dir.join(format!("{name}-frames"));
    std::fs::create_dir_all(&frames_dir).unwrap();
    for i in 0..7u32 {
        write_pixmap(&frames_dir.join(format!("frame_{i:05}.ppm")), 256, 224, |x, y| {
            if (x / 16 + y / 16 + i) % 3 == 0 {
                [255, 255, 0]
            } else {
                [0, 0, (i * 30) as u8]
            }
        });
    }

    let thumb = dir.join(format!("{name}-thumb.ppm"));
    write_pixmap(&thumb, 128, 112, |x, _| if x < 64 { [255, 0, 0] } else { [0, 255, 0] });

    let audio = dir.join(format!("{name}.pcm"));
    let samples: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&audio, samples).unwrap();

    let config = ContainerConfig {
        title: title.into(),
        fps: 2,
        sample_rate: 128,
        chunk_seconds: 1,
        compression,
        version,
        ..ContainerConfig::default()
    };

    let depth = version.color_depth();
    let thumbnail = encode_pixmap_file(&thumb, TileGrid::THUMBNAIL, depth).unwrap();
    let frames = FrameDirectory::open(&frames_dir, TileGrid::FULLSCREEN, depth).unwrap();

    let output = dir.join("videos").join(format!("{name}.segavideo"));
    build_container_file(&output, &config, &thumbnail, &audio, frames.frames()).unwrap();
}

#[test]
fn encode_catalog_and_read_back() {
    let dir = tempfile::tempdir().unwrap();

    encode_video(dir.path(), "night", "Night Drive", FormatVersion::V3, Compression::Rle);
    encode_video(dir.path(), "classic", "Classic Cut", FormatVersion::V1, Compression::None);
    encode_video(dir.path(), "cafe au lait", "Café", FormatVersion::V4, Compression::Rle);

    let videos = dir.path().join("videos");
    let inputs = ["night", "classic", "cafe au lait"].map(|name| videos.join(format!("{name}.segavideo")));

    for input in &inputs {
        let mut reader = ContainerReader::open(File::open(input).unwrap()).unwrap();
        let report = reader.verify().unwrap();

        // Seven frames at two per chunk; the audio outlasts them.
        assert_eq!(report.chunks, 4);
        assert_eq!(report.frames, 7);
        assert_eq!(reader.header().frame_count, 7);
        assert_eq!(reader.header().sound_len, 1024);

        let last = reader.read_chunk(3).unwrap();
        assert_eq!(last.frames.len(), 1);
        assert_eq!(last.audio.len(), 128);
    }

    let catalog = dir.path().join(CATALOG_FILE_NAME);
    assert_eq!(build_catalog_file(&catalog, &inputs).unwrap(), 3);

    let headers = read_catalog(&std::fs::read(&catalog).unwrap()).unwrap();
    let listing: Vec<_> = headers
        .iter()
        .map(|h| (h.title().into_owned(), h.relative_url().into_owned()))
        .collect();

    assert_eq!(
        listing,
        [
            ("Café".to_string(), "videos/cafe%20au%20lait.segavideo".to_string()),
            ("Classic Cut".to_string(), "videos/classic.segavideo".to_string()),
            ("Night Drive".to_string(), "videos/night.segavideo".to_string()),
        ]
    );
}

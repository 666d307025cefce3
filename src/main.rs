use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{ensure, Context};
use clap::{Args, Parser, Subcommand};
use segavideo_packer::{
    catalog,
    container::{build_container_file, ContainerConfig, ContainerReader},
    format::{Compression, ContainerHeader, FormatVersion},
    tile::{encode_pixmap_file, FrameDirectory, TileGrid},
    tilemap,
};
use tap::Pipe;

#[derive(Debug, Parser)]
#[command(name = "segavideo-packer", version, about = "Packs pre-quantized frames and PCM audio into streaming video containers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a container from a directory of .ppm frames and raw PCM audio
    Encode(EncodeArgs),

    /// Collect container headers into a catalog for the streaming server
    Catalog {
        /// Containers to list, at most 127
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, default_value = catalog::CATALOG_FILE_NAME)]
        output: PathBuf,
    },

    /// Print a container's header and check its chunk stream
    Inspect {
        input: PathBuf,

        /// Treat the input as a catalog and list its entries
        #[arg(long)]
        catalog: bool,
    },

    /// Write the trivial tilemaps used by the player
    Tilemap {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Debug, Args)]
struct EncodeArgs {
    /// Directory of full-screen 256x224 .ppm frames, read in name order
    frames: PathBuf,

    /// Signed 8-bit mono PCM at the configured sample rate
    audio: PathBuf,

    /// 128x112 .ppm thumbnail
    thumbnail: PathBuf,

    output: PathBuf,

    /// Defaults to the output file name without extension
    #[arg(short, long)]
    title: Option<String>,

    #[arg(long, default_value_t = 10)]
    fps: u16,

    #[arg(long, default_value_t = 13312)]
    sample_rate: u16,

    /// Seconds of playback per chunk
    #[arg(long, default_value_t = 3)]
    chunk_length: u16,

    #[arg(short = 'z', long, value_enum, default_value_t = Compression::None)]
    compression: Compression,

    #[arg(short = 'f', long, value_enum, default_value_t = FormatVersion::V3)]
    format_version: FormatVersion,

    /// Also write an SGDK .res file next to the output
    #[arg(short = 'g', long)]
    generate_resource_file: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match Cli::parse().command {
        Command::Encode(args) => encode(args),
        Command::Catalog { inputs, output } => {
            catalog::build_catalog_file(&output, &inputs)
                .with_context(|| format!("Unable to build catalog {}", output.display()))?;
            Ok(())
        }
        Command::Inspect {
            input,
            catalog: true,
        } => inspect_catalog(input),
        Command::Inspect {
            input,
            catalog: false,
        } => inspect(input),
        Command::Tilemap { dir } => {
            tilemap::write_trivial_tilemaps(&dir)
                .with_context(|| format!("Unable to write tilemaps into {}", dir.display()))?;
            Ok(())
        }
    }
}

fn encode(args: EncodeArgs) -> anyhow::Result<()> {
    let title = match args.title {
        Some(title) => title,
        None => args
            .output
            .file_stem()
            .context("Output path has no file name to take a title from")?
            .to_string_lossy()
            .into_owned(),
    };

    let config = ContainerConfig {
        title,
        fps: args.fps,
        sample_rate: args.sample_rate,
        chunk_seconds: args.chunk_length,
        compression: args.compression,
        version: args.format_version,
        resource_file: args.generate_resource_file,
        ..ContainerConfig::default()
    };
    config.validate()?;

    let depth = config.version.color_depth();
    let thumbnail = encode_pixmap_file(&args.thumbnail, TileGrid::THUMBNAIL, depth)
        .context("Unable to encode thumbnail")?;

    let frames = FrameDirectory::open(&args.frames, TileGrid::FULLSCREEN, depth)?;
    ensure!(!frames.is_empty(), "No .ppm frames in {}", args.frames.display());

    build_container_file(&args.output, &config, &thumbnail, &args.audio, frames.frames())
        .with_context(|| format!("Unable to build {}", args.output.display()))?;

    Ok(())
}

fn inspect(input: PathBuf) -> anyhow::Result<()> {
    let mut reader = File::open(&input)
        .with_context(|| format!("Unable to open {}", input.display()))?
        .pipe(BufReader::new)
        .pipe(ContainerReader::open)?;

    print_header(reader.header());
    if let Some(index) = reader.index() {
        println!("index:       {} of {} entries used", index.len() + 1, index.capacity());
    }

    let report = reader
        .verify()
        .with_context(|| format!("{} failed verification", input.display()))?;
    println!(
        "stream:      {} chunks, {} frames, {} audio bytes, ends at {}",
        report.chunks, report.frames, report.audio_bytes, report.end_offset
    );

    Ok(())
}

fn inspect_catalog(input: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&input).with_context(|| format!("Unable to read {}", input.display()))?;

    for (i, header) in catalog::read_catalog(&bytes)?.iter().enumerate() {
        println!("[{i}] {} -> {}", header.title(), header.relative_url());
    }

    Ok(())
}

fn print_header(header: &ContainerHeader) {
    println!("title:       {}", header.title());
    println!("address:     {}", header.relative_url());
    println!("version:     {}", header.version.number());
    println!("compression: {:?}", header.compression);
    println!("fps:         {}", header.fps);
    println!("sample rate: {}", header.sample_rate);
    println!("frames:      {}", header.frame_count);
    println!("sound:       {} bytes", header.sound_len);
    println!("chunks:      {} x {} bytes", header.chunk_count, header.chunk_size);
}

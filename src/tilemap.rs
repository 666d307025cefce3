//! Static resources for the on-device player: identity tilemaps and
//! resource-compiler declarations for binary blobs.

use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::tile::TileGrid;

/// Alignment requested from the resource compiler for every blob.
pub const RESOURCE_ALIGNMENT: u32 = 256;

/// Tilemap placing tile `i` at map cell `i` of a full-screen grid, all
/// drawn with palette line `palette`.
pub fn trivial_tilemap(palette: u16) -> Vec<u8> {
    let cells = TileGrid::FULLSCREEN.tile_count();
    let mut map = BytesMut::with_capacity(cells * 2);
    for tile in 0..cells as u16 {
        map.put_u16((palette << 13) | tile);
    }
    map.to_vec()
}

/// `BIN <variable> <file> 256`, with the variable named after the file stem.
pub fn resource_line(file: &Path) -> Result<String> {
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::IncompatibleOptions(format!("{file:?} has no usable file name")))?;
    let stem = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name);

    Ok(format!(
        "BIN {} {} {}\n",
        stem.replace('-', "_"),
        file_name,
        RESOURCE_ALIGNMENT
    ))
}

/// Writes `<stem>.res` next to `blob` and returns its path.
pub fn write_resource_file(blob: &Path) -> Result<PathBuf> {
    let path = blob.with_extension("res");
    std::fs::write(&path, resource_line(blob)?).map_err(Error::file(&path))?;

    tracing::info!("resource file {:?} generated", path);
    Ok(path)
}

/// Writes both trivial tilemaps and their resource file into `dir`.
pub fn write_trivial_tilemaps(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = vec![];
    let mut resources = String::new();

    for palette in 0..2u16 {
        let path = dir.join(format!("trivial_tilemap_{palette}.bin"));
        std::fs::write(&path, trivial_tilemap(palette)).map_err(Error::file(&path))?;
        resources.push_str(&resource_line(&path)?);
        written.push(path);
    }

    let res = dir.join("trivial_tilemap.res");
    std::fs::write(&res, resources).map_err(Error::file(&res))?;
    written.push(res);

    tracing::info!("wrote {} tilemap files into {:?}", written.len(), dir);

    Ok(written)
}

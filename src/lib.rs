//! Packs pre-quantized video frames and PCM audio into chunked containers
//! for a streaming cartridge player, and indexes finished containers in a
//! catalog.

pub mod catalog;
pub mod chunk;
pub mod container;
pub mod error;
pub mod format;
pub mod rle;
pub mod tile;
pub mod tilemap;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};

//! ROK4 slab container.
//!
//! A slab is a tiled TIFF with a fixed-size 2048-byte header (classic
//! little-endian TIFF header + one IFD, zero padded), followed by the tile
//! index (offsets, then byte counts, 32 bits each) at offsets a reader can
//! compute from the slab geometry alone, followed by the compressed tiles in
//! row-major order. Readers never need to parse the IFD; it is there so any
//! TIFF-aware tool can still open a slab.

mod nodata;
mod slab;
mod tile_image;

pub use nodata::NodataTile;
pub use slab::{SlabHeader, SlabReader, SlabWriter, DEFAULT_MEMORY_SIZE, ROK4_HEADER_SIZE};
pub use tile_image::TileImage;

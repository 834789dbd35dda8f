//! Core primitives for the ROK4 tile server and generation tools.
//!
//! This crate holds everything the image pipeline and the serving stack have
//! in common and that carries no pixel logic of its own:
//!
//! - the raster format registry ([`format`]): sample formats, photometric
//!   interpretations, compressions, extra-sample declarations and the
//!   canonical pyramid format tokens with their MIME mapping,
//! - geographic primitives ([`types`]): [`Blob`], [`ByteRange`] and the
//!   projected [`BBox`],
//! - the tile matrix model ([`matrix`]): [`TileMatrix`] and [`TileMatrixSet`],
//! - coordinate reference systems and the reprojection seam ([`crs`]),
//! - binary value readers/writers for container formats ([`io`]),
//! - the storage abstraction ([`storage`]): filesystem, in-memory and
//!   Swift-style HTTP object contexts,
//! - the service error taxonomy ([`error`]).

pub mod crs;
pub mod error;
pub mod format;
pub mod io;
pub mod matrix;
pub mod storage;
pub mod types;

pub use crs::{Crs, Reprojector, SphericalMercator};
pub use error::{ServiceError, ServiceErrorKind};
pub use format::{Compression, ExtraSample, Photometric, PyramidFormat, SampleFormat};
pub use matrix::{TileMatrix, TileMatrixSet};
pub use storage::{FileContext, MemoryContext, StorageContext, SwiftContext};
pub use types::{BBox, Blob, ByteRange};

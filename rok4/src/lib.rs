//! ROK4 tile server and generation toolbox.
//!
//! The library side hosts everything the `rok4` binary wires together: the
//! configuration model, the pyramid/level registry, on-demand tile
//! synthesis, the on-the-fly slab generator and the WMS/WMTS/TMS service
//! core. The CLI tools live in the binary crate (`src/main.rs` +
//! `src/tools/`).

pub mod config;
pub mod ondemand;
pub mod onfly;
pub mod pyramid;
pub mod service;

/// Version string advertised to upstreams.
pub const ROK4_INFO: &str = concat!("ROK4/", env!("CARGO_PKG_VERSION"));

pub mod check_work;
pub mod common;
pub mod compose_ntiff;
pub mod decimate_ntiff;
pub mod merge4tiff;
pub mod merge_ntiff;
pub mod overlay_ntiff;
pub mod serve;
pub mod slab2tiles;
pub mod work2cache;

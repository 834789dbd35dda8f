mod bbox;
mod blob;
mod byte_range;

pub use bbox::BBox;
pub use blob::Blob;
pub use byte_range::ByteRange;

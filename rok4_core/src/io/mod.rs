//! Binary value readers and writers used by the slab container code.

mod value_reader;
mod value_writer;

pub use value_reader::ValueReaderSlice;
pub use value_writer::ValueWriterBlob;

//! A thin wrapper around `Vec<u8>` used wherever raw bytes travel through the
//! system: encoded tiles, slab chunks, HTTP bodies.

use super::ByteRange;
use anyhow::{Result, ensure};
use std::fmt::Debug;
use std::ops::Range;

/// Owned byte buffer with a handful of slicing helpers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Creates a zero-filled `Blob` of the given length.
	pub fn new_sized(length: usize) -> Blob {
		Blob(vec![0u8; length])
	}

	/// Returns the bytes within `range`, or an error if the range overruns the buffer.
	pub fn read_range(&self, range: &ByteRange) -> Result<&[u8]> {
		let end = range.offset + range.length;
		ensure!(
			end as usize <= self.0.len(),
			"byte range {range:?} exceeds blob length ({})",
			self.0.len()
		);
		Ok(&self.0[range.offset as usize..end as usize])
	}

	pub fn range(&self, range: Range<usize>) -> &[u8] {
		&self.0[range]
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		&mut self.0
	}

	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.0).unwrap_or("<invalid utf8>")
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for Blob {
	fn from(vec: Vec<u8>) -> Self {
		Blob(vec)
	}
}

impl From<&[u8]> for Blob {
	fn from(slice: &[u8]) -> Self {
		Blob(slice.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(text: &str) -> Self {
		Blob(text.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(text: String) -> Self {
		Blob(text.into_bytes())
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Blob({} bytes)", self.0.len())
	}
}

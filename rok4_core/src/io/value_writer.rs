//! Sequential typed writes into a growable blob.

use crate::types::Blob;
use anyhow::{Result, ensure};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

/// Writes scalar values of a fixed byte order into an in-memory buffer.
/// `write_at_*` variants patch already-written regions, which the slab
/// writer uses to finalize its fixed-size header.
pub struct ValueWriterBlob<E: ByteOrder> {
	data: Vec<u8>,
	_endian: PhantomData<E>,
}

impl ValueWriterBlob<LittleEndian> {
	pub fn new_le() -> ValueWriterBlob<LittleEndian> {
		ValueWriterBlob {
			data: Vec::new(),
			_endian: PhantomData,
		}
	}
}

impl ValueWriterBlob<BigEndian> {
	pub fn new_be() -> ValueWriterBlob<BigEndian> {
		ValueWriterBlob {
			data: Vec::new(),
			_endian: PhantomData,
		}
	}
}

impl<E: ByteOrder> ValueWriterBlob<E> {
	pub fn position(&self) -> u64 {
		self.data.len() as u64
	}

	pub fn write_u8(&mut self, value: u8) {
		self.data.push(value);
	}

	pub fn write_u16(&mut self, value: u16) {
		let mut buf = [0u8; 2];
		E::write_u16(&mut buf, value);
		self.data.extend_from_slice(&buf);
	}

	pub fn write_u32(&mut self, value: u32) {
		let mut buf = [0u8; 4];
		E::write_u32(&mut buf, value);
		self.data.extend_from_slice(&buf);
	}

	pub fn write_f64(&mut self, value: f64) {
		let mut buf = [0u8; 8];
		E::write_f64(&mut buf, value);
		self.data.extend_from_slice(&buf);
	}

	pub fn write_slice(&mut self, slice: &[u8]) {
		self.data.extend_from_slice(slice);
	}

	/// Zero-fills up to `position`. Fails when the buffer is already longer.
	pub fn pad_to(&mut self, position: u64) -> Result<()> {
		ensure!(
			self.data.len() as u64 <= position,
			"cannot pad to {position}: already at {}",
			self.data.len()
		);
		self.data.resize(position as usize, 0);
		Ok(())
	}

	/// Patches a `u32` at an absolute offset inside the written data.
	pub fn write_u32_at(&mut self, offset: u64, value: u32) -> Result<()> {
		ensure!(
			offset + 4 <= self.data.len() as u64,
			"patch at {offset} exceeds buffer of {}",
			self.data.len()
		);
		E::write_u32(&mut self.data[offset as usize..offset as usize + 4], value);
		Ok(())
	}

	pub fn into_blob(self) -> Blob {
		Blob::from(self.data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn writes_little_endian() {
		let mut writer = ValueWriterBlob::new_le();
		writer.write_u16(42);
		writer.write_u32(8);
		assert_eq!(writer.into_blob().as_slice(), &[0x2A, 0x00, 0x08, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn pad_and_patch() {
		let mut writer = ValueWriterBlob::new_le();
		writer.write_u32(0);
		writer.pad_to(16).unwrap();
		writer.write_u32_at(0, 0xDEAD_BEEF).unwrap();
		let blob = writer.into_blob();
		assert_eq!(blob.len(), 16);
		assert_eq!(blob.range(0..4), &[0xEF, 0xBE, 0xAD, 0xDE]);
		assert_eq!(blob.range(4..16), &[0u8; 12]);
	}
}

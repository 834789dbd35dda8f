//! Sequential typed reads over a byte slice.

use anyhow::{Result, ensure};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

/// Reads scalar values of a fixed byte order from a slice, advancing an
/// internal cursor.
pub struct ValueReaderSlice<'a, E: ByteOrder> {
	data: &'a [u8],
	position: usize,
	_endian: PhantomData<E>,
}

impl<'a> ValueReaderSlice<'a, LittleEndian> {
	pub fn new_le(data: &'a [u8]) -> ValueReaderSlice<'a, LittleEndian> {
		ValueReaderSlice {
			data,
			position: 0,
			_endian: PhantomData,
		}
	}
}

impl<'a> ValueReaderSlice<'a, BigEndian> {
	pub fn new_be(data: &'a [u8]) -> ValueReaderSlice<'a, BigEndian> {
		ValueReaderSlice {
			data,
			position: 0,
			_endian: PhantomData,
		}
	}
}

impl<'a, E: ByteOrder> ValueReaderSlice<'a, E> {
	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		ensure!(
			self.position + n <= self.data.len(),
			"read of {n} bytes at {} exceeds buffer of {}",
			self.position,
			self.data.len()
		);
		let slice = &self.data[self.position..self.position + n];
		self.position += n;
		Ok(slice)
	}

	pub fn position(&self) -> u64 {
		self.position as u64
	}

	pub fn set_position(&mut self, position: u64) -> Result<()> {
		ensure!(
			position as usize <= self.data.len(),
			"position {position} exceeds buffer of {}",
			self.data.len()
		);
		self.position = position as usize;
		Ok(())
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		Ok(self.take(1)?[0])
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(E::read_u16(self.take(2)?))
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(E::read_u32(self.take(4)?))
	}

	pub fn read_i32(&mut self) -> Result<i32> {
		Ok(E::read_i32(self.take(4)?))
	}

	pub fn read_f64(&mut self) -> Result<f64> {
		Ok(E::read_f64(self.take(8)?))
	}

	pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
		self.take(n)
	}
}

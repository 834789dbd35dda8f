//! BIL / zBIL decoding.
//!
//! BIL rasters are headerless interleaved samples, little-endian; the `z`
//! prefixed variant wraps the same payload in a zlib stream. Geometry and
//! sample type come from the caller.

use super::decode::{Decoded, SampleBuffer};
use anyhow::{Context, Result, ensure};
use flate2::read::ZlibDecoder;
use rok4_core::format::{ExtraSample, SampleFormat};
use std::io::Read;
use std::path::Path;

pub fn decode(path: &Path, width: u32, height: u32, channels: u16, sample_format: SampleFormat) -> Result<Decoded> {
	let mut data = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;

	let zipped = path.extension().and_then(|e| e.to_str()) == Some("zbil");
	if zipped {
		let mut inflated = Vec::new();
		ZlibDecoder::new(data.as_slice())
			.read_to_end(&mut inflated)
			.with_context(|| format!("inflating {path:?}"))?;
		data = inflated;
	}

	let samples = width as usize * height as usize * channels as usize;
	ensure!(
		data.len() == samples * sample_format.bytes_per_sample(),
		"BIL {path:?} holds {} bytes, expected {} ({width}x{height}x{channels} {sample_format})",
		data.len(),
		samples * sample_format.bytes_per_sample()
	);

	let buffer = match sample_format {
		SampleFormat::Uint8 => SampleBuffer::U8(data),
		SampleFormat::Uint16 => SampleBuffer::U16(
			data
				.chunks_exact(2)
				.map(|c| u16::from_le_bytes([c[0], c[1]]))
				.collect(),
		),
		SampleFormat::Float32 => SampleBuffer::F32(
			data
				.chunks_exact(4)
				.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
				.collect(),
		),
	};

	Ok(Decoded {
		width,
		height,
		channels,
		extra_sample: ExtraSample::None,
		buffer,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use flate2::write::ZlibEncoder;
	use std::io::Write;

	#[test]
	fn float_bil_round_trip() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("dem.bil");
		let values = [1.5f32, -99999.0, 42.25, 0.0];
		let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
		std::fs::write(&path, &bytes)?;

		let decoded = decode(&path, 2, 2, 1, SampleFormat::Float32)?;
		let SampleBuffer::F32(data) = decoded.buffer else {
			panic!("wrong buffer type")
		};
		assert_eq!(data, values);
		Ok(())
	}

	#[test]
	fn zbil_inflates_first() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("dem.zbil");
		let raw = vec![5u8, 10, 15, 20];
		let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
		encoder.write_all(&raw)?;
		std::fs::write(&path, encoder.finish()?)?;

		let decoded = decode(&path, 2, 2, 1, SampleFormat::Uint8)?;
		let SampleBuffer::U8(data) = decoded.buffer else {
			panic!("wrong buffer type")
		};
		assert_eq!(data, raw);
		Ok(())
	}

	#[test]
	fn size_mismatch_is_refused() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("dem.bil");
		std::fs::write(&path, [0u8; 10])?;
		ensure!(decode(&path, 2, 2, 1, SampleFormat::Uint8).is_err());
		Ok(())
	}
}

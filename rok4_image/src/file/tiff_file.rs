//! TIFF decoding through the `tiff` crate.
//!
//! Unlike PNG/JPEG this path must carry 16-bit and 32-bit float samples
//! unscaled (digital terrain models), and must honour the `ExtraSamples`
//! declaration so associated alpha gets un-premultiplied downstream.

use super::decode::{Decoded, SampleBuffer};
use anyhow::{Context, Result, bail};
use rok4_core::format::ExtraSample;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

pub fn decode(path: &Path) -> Result<Decoded> {
	let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
	let mut decoder = Decoder::new(BufReader::new(file)).with_context(|| format!("reading TIFF header of {path:?}"))?;

	let (width, height) = decoder.dimensions().context("reading TIFF dimensions")?;
	let colortype = decoder.colortype().context("reading TIFF color type")?;
	let channels = match colortype {
		tiff::ColorType::Gray(_) => 1,
		tiff::ColorType::GrayA(_) => 2,
		tiff::ColorType::RGB(_) => 3,
		tiff::ColorType::RGBA(_) => 4,
		other => bail!("unsupported TIFF color type {other:?} in {path:?}"),
	};

	// ExtraSamples tag value 1 declares premultiplied alpha.
	let declared = decoder
		.find_tag(Tag::ExtraSamples)
		.ok()
		.flatten()
		.and_then(|value| value.into_u64().ok());
	let extra_sample = match declared {
		Some(1) => ExtraSample::AlphaAssoc,
		Some(2) => ExtraSample::AlphaUnassoc,
		_ => {
			if channels == 2 || channels == 4 {
				ExtraSample::AlphaUnassoc
			} else {
				ExtraSample::None
			}
		}
	};

	let buffer = match decoder.read_image().with_context(|| format!("decoding {path:?}"))? {
		DecodingResult::U8(data) => SampleBuffer::U8(data),
		DecodingResult::U16(data) => SampleBuffer::U16(data),
		DecodingResult::F32(data) => SampleBuffer::F32(data),
		other => bail!("unsupported TIFF sample type {:?} in {path:?}", sample_name(&other)),
	};

	let expected = width as usize * height as usize * channels as usize;
	if buffer.len() != expected {
		bail!(
			"TIFF {path:?} decoded to {} samples, expected {expected} ({}x{}x{channels})",
			buffer.len(),
			width,
			height
		);
	}

	Ok(Decoded {
		width,
		height,
		channels: channels as u16,
		extra_sample,
		buffer,
	})
}

fn sample_name(result: &DecodingResult) -> &'static str {
	match result {
		DecodingResult::U16(_) => "u16",
		DecodingResult::U32(_) => "u32",
		DecodingResult::U64(_) => "u64",
		DecodingResult::I8(_) => "i8",
		DecodingResult::I16(_) => "i16",
		DecodingResult::I32(_) => "i32",
		DecodingResult::I64(_) => "i64",
		DecodingResult::F64(_) => "f64",
		_ => "unhandled",
	}
}

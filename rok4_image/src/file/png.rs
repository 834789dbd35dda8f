//! PNG decoding through the `image` crate.

use super::decode::{Decoded, SampleBuffer};
use anyhow::{Context, Result, bail};
use image::DynamicImage;
use rok4_core::format::ExtraSample;
use std::path::Path;

pub fn decode(path: &Path) -> Result<Decoded> {
	let data = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
	let image =
		image::load_from_memory_with_format(&data, image::ImageFormat::Png).with_context(|| format!("decoding {path:?}"))?;
	from_dynamic(image)
}

/// Maps a `DynamicImage` onto the pipeline's sample buffers. PNG alpha is
/// unassociated by definition.
pub fn from_dynamic(image: DynamicImage) -> Result<Decoded> {
	let width = image.width();
	let height = image.height();
	let channels = u16::from(image.color().channel_count());
	let extra_sample = if image.color().has_alpha() {
		ExtraSample::AlphaUnassoc
	} else {
		ExtraSample::None
	};
	let buffer = match image {
		DynamicImage::ImageLuma8(b) => SampleBuffer::U8(b.into_raw()),
		DynamicImage::ImageLumaA8(b) => SampleBuffer::U8(b.into_raw()),
		DynamicImage::ImageRgb8(b) => SampleBuffer::U8(b.into_raw()),
		DynamicImage::ImageRgba8(b) => SampleBuffer::U8(b.into_raw()),
		DynamicImage::ImageLuma16(b) => SampleBuffer::U16(b.into_raw()),
		DynamicImage::ImageLumaA16(b) => SampleBuffer::U16(b.into_raw()),
		DynamicImage::ImageRgb16(b) => SampleBuffer::U16(b.into_raw()),
		DynamicImage::ImageRgba16(b) => SampleBuffer::U16(b.into_raw()),
		other => bail!("unsupported decoded color layout {:?}", other.color()),
	};
	Ok(Decoded {
		width,
		height,
		channels,
		extra_sample,
		buffer,
	})
}

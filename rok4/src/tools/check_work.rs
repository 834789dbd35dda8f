//! Verify that an image file decodes end to end.

use anyhow::{Context, Result};
use rok4_core::crs::Crs;
use rok4_core::format::SampleFormat;
use rok4_core::types::BBox;
use rok4_image::{FileImage, ImageNode};
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Image to verify
	image: PathBuf,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	// geometry does not matter for a decodability check
	let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).expect("static bbox");
	let image =
		FileImage::open(&arguments.image, bbox, Crs::from_id("LOCAL")).with_context(|| format!("{:?}", arguments.image))?;

	let meta = image.meta();
	let mut u8_line = vec![0u8; meta.line_len()];
	let mut f32_line = vec![0f32; meta.line_len()];
	for y in 0..meta.height() {
		match meta.sample_format() {
			SampleFormat::Float32 => image.read_line_f32(y, &mut f32_line)?,
			_ => image.read_line_u8(y, &mut u8_line)?,
		}
	}
	log::info!(
		"{:?}: {}x{}, {} channels, {}",
		arguments.image,
		meta.width(),
		meta.height(),
		meta.channels(),
		meta.sample_format()
	);
	Ok(())
}

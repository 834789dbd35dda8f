//! Merge N georeferenced images onto one output image, resampling and
//! reprojecting whatever does not line up with the output grid.

use super::common::{forced_sample_format, parse_image_list, parse_nodata, write_output, ImageEntry};
use anyhow::{Context, Result};
use rok4_core::crs::{Reprojector, SphericalMercator};
use rok4_core::format::Compression;
use rok4_image::{
	mirror_size_for, ExtendedCompoundImage, ImageMeta, Kernel, MaskAdapter, MirrorImage, ReprojectedImage,
	ResampledImage, SharedImage,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Configuration file: output image first, then the inputs
	#[arg(short = 'f', long = "file")]
	file: PathBuf,

	/// Output compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,

	/// Interpolation kernel (nn, linear, bicubic, lanczos)
	#[arg(short = 'i', long, default_value = "bicubic")]
	interpolation: String,

	/// Nodata, one value per output channel, comma separated
	#[arg(short = 'n', long)]
	nodata: String,

	/// Force the output sample format (uint or float)
	#[arg(short = 'a', long)]
	sample_format: Option<String>,

	/// Force the output bits per sample (8 or 32)
	#[arg(short = 'b', long)]
	bits: Option<u16>,

	/// Force the output channel count (1..=4)
	#[arg(short = 's', long)]
	channels: Option<u16>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let (output, inputs) = parse_image_list(&arguments.file)?;
	let compression = Compression::from_tool_token(&arguments.compression)?;
	let kernel: Kernel = arguments.interpolation.parse()?;
	let nodata = parse_nodata(&arguments.nodata)?;
	let forced = forced_sample_format(arguments.sample_format.as_deref(), arguments.bits)?;

	let image = build(&output, &inputs, kernel, nodata, forced, arguments.channels)?;
	write_output(&output, &image, compression)
}

fn build(
	output: &ImageEntry,
	inputs: &[ImageEntry],
	kernel: Kernel,
	nodata: Vec<f32>,
	forced: Option<rok4_core::format::SampleFormat>,
	forced_channels: Option<u16>,
) -> Result<SharedImage> {
	let reprojector = SphericalMercator;

	// open the first input to learn the default output format
	let first = inputs[0].open(forced_channels)?;
	let channels = forced_channels.unwrap_or(first.meta().channels());
	let sample_format = forced.unwrap_or(first.meta().sample_format());
	let target = output.meta(channels, sample_format)?;

	let mut children: Vec<SharedImage> = Vec::new();
	for (index, entry) in inputs.iter().enumerate() {
		let image = if index == 0 { first.clone() } else { entry.open(forced_channels)? };
		children.push(fit_to(&target, image, kernel, &nodata, &reprojector).with_context(|| format!("input {:?}", entry.path))?);
	}

	Ok(Arc::new(ExtendedCompoundImage::new(target, children, nodata)?))
}

/// Leaves compatible inputs alone; resamples same-CRS inputs and reprojects
/// the rest onto the output grid.
fn fit_to(
	target: &ImageMeta,
	image: SharedImage,
	kernel: Kernel,
	nodata: &[f32],
	reprojector: &dyn Reprojector,
) -> Result<SharedImage> {
	if image.meta().is_compatible_with(target) {
		return Ok(image);
	}

	// the mask keeps the true footprint: no mirroring, and a full-coverage
	// synthetic one when the file came without
	let mask: SharedImage = match MaskAdapter::of(image.clone()) {
		Some(mask) => Arc::new(mask),
		None => {
			let meta = ImageMeta::new(
				image.meta().width(),
				image.meta().height(),
				1,
				rok4_core::format::SampleFormat::Uint8,
				*image.meta().bbox(),
				image.meta().crs().clone(),
			)?;
			Arc::new(rok4_image::EmptyImage::new(meta, vec![255.0]))
		}
	};

	let ratio = (target.res_x() / image.meta().res_x()).max(target.res_y() / image.meta().res_y());
	let margin = mirror_size_for(kernel.size(ratio.max(1.0)));
	let source: SharedImage = match MirrorImage::around(image.clone(), margin) {
		Ok(mirrored) => Arc::new(mirrored),
		Err(_) => image.clone(),
	};

	// the fitted child covers the whole output; uncovered pixels fall back
	// to nodata through its mask
	if image.meta().crs().id() == target.crs().id() {
		Ok(Arc::new(ResampledImage::new(source, target.clone(), kernel, Some(mask))?))
	} else {
		Ok(Arc::new(ReprojectedImage::new(
			source,
			target.clone(),
			kernel,
			reprojector,
			nodata.to_vec(),
			Some(mask),
		)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::types::BBox;
	use rok4_image::file::write_tiff;
	use rok4_image::{EmptyImage, ImageNode};

	#[test]
	fn merges_two_inputs_with_nodata_gaps() -> Result<()> {
		let dir = tempfile::tempdir()?;
		// two 4x4 gray inputs in opposite corners of an 8x8 output
		for (name, value, bbox) in [
			("a.tif", 10.0, BBox::new(0.0, 4.0, 4.0, 8.0).unwrap()),
			("b.tif", 20.0, BBox::new(4.0, 0.0, 8.0, 4.0).unwrap()),
		] {
			let meta = ImageMeta::new(
				4,
				4,
				1,
				rok4_core::format::SampleFormat::Uint8,
				bbox,
				Crs::from_id("EPSG:2154"),
			)?;
			write_tiff(&dir.path().join(name), &EmptyImage::new(meta, vec![value]), Compression::None)?;
		}

		let list = dir.path().join("images.list");
		let out = dir.path().join("out.tif");
		std::fs::write(
			&list,
			format!(
				"IMG {} EPSG:2154 0 8 8 0 1 1\n\
				 IMG {} EPSG:2154 0 8 4 4 1 1\n\
				 IMG {} EPSG:2154 4 4 8 0 1 1\n",
				out.display(),
				dir.path().join("a.tif").display(),
				dir.path().join("b.tif").display()
			),
		)?;

		run(&Subcommand {
			file: list,
			compression: "raw".to_string(),
			interpolation: "nn".to_string(),
			nodata: "255".to_string(),
			sample_format: None,
			bits: None,
			channels: None,
		})?;

		let merged = rok4_image::FileImage::open(&out, BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), Crs::from_id("EPSG:2154"))?;
		let mut line = vec![0u8; 8];
		merged.read_line_u8(0, &mut line)?;
		assert_eq!(line, vec![10, 10, 10, 10, 255, 255, 255, 255]);
		merged.read_line_u8(6, &mut line)?;
		assert_eq!(line, vec![255, 255, 255, 255, 20, 20, 20, 20]);
		Ok(())
	}
}

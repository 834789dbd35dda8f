//! Shared plumbing of the generation tools.
//!
//! The image-list configuration format, one entry per line:
//!
//! ```text
//! IMG <path> <crs> <xmin> <ymax> <xmax> <ymin> <resx> <resy>
//! MSK <path>
//! ```
//!
//! A `MSK` line attaches a mask to the `IMG` line above it. The first entry
//! is the output; the remaining entries are the inputs.

use anyhow::{Context, Result, bail, ensure};
use rok4_core::crs::Crs;
use rok4_core::format::SampleFormat;
use rok4_core::types::BBox;
use rok4_image::file::write_tiff;
use rok4_image::{FileImage, ImageMeta, ImageNode, MaskAdapter, MaskedImage, SharedImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
	pub path: PathBuf,
	pub crs: Crs,
	pub bbox: BBox,
	pub res_x: f64,
	pub res_y: f64,
	pub mask: Option<PathBuf>,
}

impl ImageEntry {
	pub fn width(&self) -> u32 {
		(self.bbox.width() / self.res_x).round() as u32
	}

	pub fn height(&self) -> u32 {
		(self.bbox.height() / self.res_y).round() as u32
	}

	/// Opens the entry as an image node, mask attached, geometry checked.
	pub fn open(&self, forced_channels: Option<u16>) -> Result<SharedImage> {
		let mut image =
			FileImage::open(&self.path, self.bbox, self.crs.clone()).with_context(|| format!("opening {:?}", self.path))?;
		image
			.check_geometry(self.res_x, self.res_y)
			.with_context(|| format!("image {:?}", self.path))?;
		if let Some(channels) = forced_channels {
			if channels != image.meta().channels() {
				image.convert_to_channels(channels)?;
			}
		}
		let image: SharedImage = Arc::new(image);
		match &self.mask {
			None => Ok(image),
			Some(mask_path) => {
				let mask = FileImage::open(mask_path, self.bbox, self.crs.clone())
					.with_context(|| format!("opening mask {mask_path:?}"))?;
				Ok(Arc::new(MaskedImage::new(image, Arc::new(mask))?))
			}
		}
	}

	/// The output geometry this entry declares.
	pub fn meta(&self, channels: u16, sample_format: SampleFormat) -> Result<ImageMeta> {
		ImageMeta::new(self.width(), self.height(), channels, sample_format, self.bbox, self.crs.clone())
	}
}

/// Parses an image-list file into (output, inputs).
pub fn parse_image_list(path: &Path) -> Result<(ImageEntry, Vec<ImageEntry>)> {
	let body = std::fs::read_to_string(path).with_context(|| format!("reading configuration {path:?}"))?;
	let mut entries: Vec<ImageEntry> = Vec::new();

	for (number, line) in body.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let fields: Vec<&str> = line.split_whitespace().collect();
		match fields[0] {
			"IMG" => {
				ensure!(
					fields.len() == 9,
					"line {}: IMG takes <path> <crs> <xmin> <ymax> <xmax> <ymin> <resx> <resy>",
					number + 1
				);
				let number_field = |index: usize| -> Result<f64> {
					fields[index]
						.parse()
						.with_context(|| format!("line {}: '{}' is not a number", number + 1, fields[index]))
				};
				let (xmin, ymax, xmax, ymin) = (number_field(3)?, number_field(4)?, number_field(5)?, number_field(6)?);
				entries.push(ImageEntry {
					path: PathBuf::from(fields[1]),
					crs: Crs::from_id(fields[2]),
					bbox: BBox::new(xmin, ymin, xmax, ymax)
						.with_context(|| format!("line {}: degenerate bbox", number + 1))?,
					res_x: number_field(7)?,
					res_y: number_field(8)?,
					mask: None,
				});
			}
			"MSK" => {
				ensure!(fields.len() == 2, "line {}: MSK takes <path>", number + 1);
				let entry = entries
					.last_mut()
					.with_context(|| format!("line {}: MSK without a preceding IMG", number + 1))?;
				ensure!(entry.mask.is_none(), "line {}: IMG already has a mask", number + 1);
				entry.mask = Some(PathBuf::from(fields[1]));
			}
			other => bail!("line {}: unknown entry '{other}'", number + 1),
		}
	}

	ensure!(entries.len() >= 2, "the configuration needs one output and at least one input");
	let output = entries.remove(0);
	Ok((output, entries))
}

/// Parses a comma-separated nodata vector.
pub fn parse_nodata(value: &str) -> Result<Vec<f32>> {
	value
		.split(',')
		.map(|v| v.trim().parse::<f32>().with_context(|| format!("'{v}' is not a nodata value")))
		.collect()
}

/// Resolves the forced output format flags (`-a`, `-b`) into a sample
/// format, if all are given.
pub fn forced_sample_format(format: Option<&str>, bits: Option<u16>) -> Result<Option<SampleFormat>> {
	match (format, bits) {
		(None, None) => Ok(None),
		(Some(format), Some(bits)) => Ok(Some(SampleFormat::from_parts(format.eq_ignore_ascii_case("float"), bits)?)),
		_ => bail!("forcing the output format takes both -a and -b"),
	}
}

/// Writes an image and, when requested, its mask next to it.
pub fn write_output(
	output: &ImageEntry,
	image: &SharedImage,
	compression: rok4_core::format::Compression,
) -> Result<()> {
	write_tiff(&output.path, image.as_ref(), compression).with_context(|| format!("writing {:?}", output.path))?;
	if let Some(mask_path) = &output.mask {
		let mask = MaskAdapter::of(image.clone()).context("the pipeline produced no mask to write")?;
		write_tiff(mask_path, &mask, rok4_core::format::Compression::Deflate)
			.with_context(|| format!("writing mask {mask_path:?}"))?;
	}
	Ok(())
}

//! Subsample a 2×2 block of tiles into one tile of the next coarser level.
//!
//! Each output pixel is the average of the 2×2 input pixels that carry
//! data; at least two of the four must carry data, a lone sample is not
//! representative and the pixel keeps the background (or nodata) instead.
//! For 8-bit images the average goes through a gamma table,
//! `out = 255 − round(((1020 − sum)/1020)^γ · 255)` over the sum of the
//! four samples, which darkens (γ < 1) or brightens (γ > 1) the result;
//! γ = 1 is the plain mean.

use anyhow::{Context, Result, ensure};
use rok4_core::crs::Crs;
use rok4_core::format::{Compression, SampleFormat};
use rok4_core::types::BBox;
use rok4_image::file::write_tiff;
use rok4_image::{FileImage, ImageMeta, ImageNode, SharedImage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Gamma applied to 8-bit averaging (1.0 = plain mean)
	#[arg(short = 'g', long, default_value_t = 1.0)]
	gamma: f64,

	/// Nodata, one value per channel, comma separated
	#[arg(short = 'n', long)]
	nodata: String,

	/// Output compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,

	/// Background image, used where no input has data
	#[arg(long = "ib")]
	background: Option<PathBuf>,

	/// Background mask
	#[arg(long = "mb")]
	background_mask: Option<PathBuf>,

	/// Top-left input
	#[arg(long = "i1")]
	input1: Option<PathBuf>,
	/// Its mask
	#[arg(long = "m1")]
	mask1: Option<PathBuf>,

	/// Top-right input
	#[arg(long = "i2")]
	input2: Option<PathBuf>,
	/// Its mask
	#[arg(long = "m2")]
	mask2: Option<PathBuf>,

	/// Bottom-left input
	#[arg(long = "i3")]
	input3: Option<PathBuf>,
	/// Its mask
	#[arg(long = "m3")]
	mask3: Option<PathBuf>,

	/// Bottom-right input
	#[arg(long = "i4")]
	input4: Option<PathBuf>,
	/// Its mask
	#[arg(long = "m4")]
	mask4: Option<PathBuf>,

	/// Output image
	#[arg(long = "io")]
	output: PathBuf,

	/// Output mask
	#[arg(long = "mo")]
	output_mask: Option<PathBuf>,
}

struct Quadrant {
	image: FileImage,
	mask: Option<FileImage>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	ensure!(arguments.gamma > 0.0, "-g must be > 0");
	let compression = Compression::from_tool_token(&arguments.compression)?;
	let nodata = super::common::parse_nodata(&arguments.nodata)?;

	let dummy_bbox = BBox::new(0.0, 0.0, 1.0, 1.0).expect("static bbox");
	let crs = Crs::from_id("LOCAL");
	let open = |path: &Option<PathBuf>, mask: &Option<PathBuf>| -> Result<Option<Quadrant>> {
		let Some(path) = path else { return Ok(None) };
		let image = FileImage::open(path, dummy_bbox, crs.clone()).with_context(|| format!("opening {path:?}"))?;
		let mask = match mask {
			None => None,
			Some(mask_path) => {
				Some(FileImage::open(mask_path, dummy_bbox, crs.clone()).with_context(|| format!("opening {mask_path:?}"))?)
			}
		};
		Ok(Some(Quadrant { image, mask }))
	};

	let quadrants = [
		open(&arguments.input1, &arguments.mask1)?,
		open(&arguments.input2, &arguments.mask2)?,
		open(&arguments.input3, &arguments.mask3)?,
		open(&arguments.input4, &arguments.mask4)?,
	];
	ensure!(quadrants.iter().any(Option::is_some), "at least one input tile is needed");
	let background = open(&arguments.background, &arguments.background_mask)?;

	let reference = quadrants
		.iter()
		.flatten()
		.next()
		.expect("at least one quadrant checked above");
	let width = reference.image.meta().width();
	let height = reference.image.meta().height();
	let channels = reference.image.meta().channels();
	let sample_format = reference.image.meta().sample_format();
	ensure!(
		width % 2 == 0 && height % 2 == 0,
		"input tiles must have even dimensions"
	);
	for quadrant in quadrants.iter().flatten() {
		let meta = quadrant.image.meta();
		ensure!(
			meta.width() == width && meta.height() == height && meta.channels() == channels,
			"all input tiles must share geometry and channels"
		);
	}
	if let Some(background) = &background {
		let meta = background.image.meta();
		ensure!(
			meta.width() == width && meta.height() == height && meta.channels() == channels,
			"the background must share the tile geometry"
		);
	}

	let (pixels, mask) = average(
		&quadrants,
		background.as_ref(),
		width,
		height,
		channels,
		sample_format,
		arguments.gamma,
		&nodata,
	)?;

	let out = Arc::new(InMemoryImage {
		meta: ImageMeta::new(width, height, channels, sample_format, dummy_bbox, crs.clone())?,
		values: pixels,
	});
	write_tiff(&arguments.output, out.as_ref() as &dyn ImageNode, compression)
		.with_context(|| format!("writing {:?}", arguments.output))?;
	if let Some(mask_path) = &arguments.output_mask {
		let mask_image: SharedImage = Arc::new(InMemoryImage {
			meta: ImageMeta::new(width, height, 1, SampleFormat::Uint8, dummy_bbox, crs)?,
			values: mask.iter().map(|&v| f32::from(v)).collect(),
		});
		write_tiff(mask_path, mask_image.as_ref(), Compression::Deflate)
			.with_context(|| format!("writing mask {mask_path:?}"))?;
	}
	Ok(())
}

/// Averages the four quadrants into one tile, honouring masks and the
/// gamma table. Returns native-unit values plus the output mask.
#[allow(clippy::too_many_arguments)]
fn average(
	quadrants: &[Option<Quadrant>; 4],
	background: Option<&Quadrant>,
	width: u32,
	height: u32,
	channels: u16,
	sample_format: SampleFormat,
	gamma: f64,
	nodata: &[f32],
) -> Result<(Vec<f32>, Vec<u8>)> {
	ensure!(
		nodata.len() >= channels as usize,
		"nodata must provide {channels} values"
	);
	// the gamma lookup over the 0..=1020 sum of four 8-bit samples
	let merge_table: Vec<f32> = (0..=1020)
		.map(|sum| 255.0 - ((f64::from(1020 - sum) / 1020.0).powf(gamma) * 255.0).round() as f32)
		.collect();

	let scale = match sample_format {
		SampleFormat::Uint8 => 255.0f32,
		SampleFormat::Uint16 => 65535.0,
		SampleFormat::Float32 => 1.0,
	};
	// averaging happens in the 0..1 mapping of read_line_f32
	let nodata_scaled: Vec<f32> = nodata.iter().map(|v| v / scale).collect();

	let channels = channels as usize;
	let line_len = width as usize * channels;
	let mut pixels = vec![0f32; line_len * height as usize];
	let mut mask = vec![0u8; width as usize * height as usize];

	let mut line_a = vec![0f32; line_len];
	let mut line_b = vec![0f32; line_len];
	let mut mask_a = vec![255u8; width as usize];
	let mut mask_b = vec![255u8; width as usize];
	let mut background_line = vec![0f32; line_len];
	let mut background_mask_line = vec![255u8; width as usize];

	for out_y in 0..height {
		// top half reads quadrants 1|2, bottom half 3|4
		let (left, right, source_y) = if out_y < height / 2 {
			(&quadrants[0], &quadrants[1], out_y * 2)
		} else {
			(&quadrants[2], &quadrants[3], (out_y - height / 2) * 2)
		};

		if let Some(background) = background {
			background.image.read_line_f32(out_y, &mut background_line)?;
			read_mask_line(background.mask.as_ref(), out_y, &mut background_mask_line)?;
		}

		for (quadrant, x_offset) in [(left, 0u32), (right, width / 2)] {
			let out_row = out_y as usize * line_len;
			match quadrant {
				None => {
					for out_x in x_offset..x_offset + width / 2 {
						let p = out_row + out_x as usize * channels;
						fill_background(
							&mut pixels[p..p + channels],
							&mut mask[out_y as usize * width as usize + out_x as usize],
							background.is_some(),
							&background_line[p - out_row..p - out_row + channels],
							background_mask_line[out_x as usize],
							&nodata_scaled,
						);
					}
				}
				Some(quadrant) => {
					quadrant.image.read_line_f32(source_y, &mut line_a)?;
					quadrant.image.read_line_f32(source_y + 1, &mut line_b)?;
					read_mask_line(quadrant.mask.as_ref(), source_y, &mut mask_a)?;
					read_mask_line(quadrant.mask.as_ref(), source_y + 1, &mut mask_b)?;

					for block in 0..width / 2 {
						let out_x = x_offset + block;
						let source_x = block as usize * 2;
						let mut data = 0u32;
						let mut sums = vec![0f64; channels];
						for (line, line_mask) in [(&line_a, &mask_a), (&line_b, &mask_b)] {
							for dx in 0..2usize {
								if line_mask[source_x + dx] != 0 {
									data += 1;
									for c in 0..channels {
										sums[c] += f64::from(line[(source_x + dx) * channels + c]);
									}
								}
							}
						}

						let p = out_row + out_x as usize * channels;
						let mask_index = out_y as usize * width as usize + out_x as usize;
						// a single valid sample is not representative
						if data <= 1 {
							fill_background(
								&mut pixels[p..p + channels],
								&mut mask[mask_index],
								background.is_some(),
								&background_line[p - out_row..p - out_row + channels],
								background_mask_line[out_x as usize],
								&nodata_scaled,
							);
						} else {
							mask[mask_index] = 255;
							for c in 0..channels {
								let value = if sample_format == SampleFormat::Uint8 {
									// scale the 0..1 samples back to bytes for the table
									let sum = (sums[c] * 255.0 * 4.0 / f64::from(data)).round() as usize;
									f64::from(merge_table[sum.min(1020)]) / 255.0
								} else {
									sums[c] / f64::from(data)
								};
								pixels[p + c] = value as f32;
							}
						}
					}
				}
			}
		}
	}

	// back to native units for the writer
	if sample_format != SampleFormat::Float32 {
		for value in &mut pixels {
			*value *= scale;
		}
	}
	Ok((pixels, mask))
}

fn fill_background(
	out: &mut [f32],
	mask: &mut u8,
	has_background: bool,
	background: &[f32],
	background_mask: u8,
	nodata: &[f32],
) {
	if has_background && background_mask != 0 {
		out.copy_from_slice(background);
		*mask = 255;
	} else {
		out.copy_from_slice(&nodata[..out.len()]);
		*mask = 0;
	}
}

fn read_mask_line(mask: Option<&FileImage>, y: u32, buffer: &mut [u8]) -> Result<()> {
	match mask {
		None => buffer.fill(255),
		Some(mask) => mask.read_line_u8(y, buffer)?,
	}
	Ok(())
}

/// Raster held in memory in native units, pushed to the TIFF writer.
struct InMemoryImage {
	meta: ImageMeta,
	values: Vec<f32>,
}

impl ImageNode for InMemoryImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		let len = self.meta.line_len();
		for (out, value) in buffer[..len].iter_mut().zip(&self.values[y as usize * len..]) {
			*out = value.clamp(0.0, 255.0).round() as u8;
		}
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		let len = self.meta.line_len();
		buffer[..len].copy_from_slice(&self.values[y as usize * len..y as usize * len + len]);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_image::EmptyImage;

	fn write_tile(path: &PathBuf, value: f32) {
		let meta = ImageMeta::new(
			2,
			2,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
			Crs::from_id("LOCAL"),
		)
		.unwrap();
		write_tiff(path, &EmptyImage::new(meta, vec![value]), Compression::None).unwrap();
	}

	fn merge(dir: &std::path::Path, gamma: f64, values: [f32; 4]) -> u8 {
		for (i, value) in values.iter().enumerate() {
			write_tile(&dir.join(format!("i{}.tif", i + 1)), *value);
		}
		let out = dir.join("out.tif");
		run(&Subcommand {
			gamma,
			nodata: "255".to_string(),
			compression: "raw".to_string(),
			background: None,
			background_mask: None,
			input1: Some(dir.join("i1.tif")),
			mask1: None,
			input2: Some(dir.join("i2.tif")),
			mask2: None,
			input3: Some(dir.join("i3.tif")),
			mask3: None,
			input4: Some(dir.join("i4.tif")),
			mask4: None,
			output: out.clone(),
			output_mask: None,
		})
		.unwrap();

		let result = FileImage::open(&out, BBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), Crs::from_id("LOCAL")).unwrap();
		let mut line = vec![0u8; 2];
		result.read_line_u8(0, &mut line).unwrap();
		line[0]
	}

	#[test]
	fn gamma_one_is_the_plain_mean() {
		let dir = tempfile::tempdir().unwrap();
		// every quadrant constant: the 2x2 block of quadrant 1 averages to
		// its own value
		assert_eq!(merge(dir.path(), 1.0, [100.0, 0.0, 0.0, 0.0]), 100);
	}

	#[test]
	fn gamma_two_brightens() {
		let dir = tempfile::tempdir().unwrap();
		// mean 100: out = 255 - round((1 - 100/255)^2 * 255)
		let expected = 255 - ((1.0f64 - 100.0 / 255.0).powi(2) * 255.0).round() as u8;
		assert_eq!(merge(dir.path(), 2.0, [100.0, 50.0, 50.0, 50.0]), expected);
	}

	fn write_mask(path: &PathBuf, values: [u8; 4]) {
		let meta = ImageMeta::new(
			2,
			2,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
			Crs::from_id("LOCAL"),
		)
		.unwrap();
		let mask = InMemoryImage {
			meta,
			values: values.iter().map(|&v| f32::from(v)).collect(),
		};
		write_tiff(path, &mask, Compression::None).unwrap();
	}

	fn merge_masked(dir: &std::path::Path, mask_values: [u8; 4]) -> (u8, u8) {
		write_tile(&dir.join("i1.tif"), 80.0);
		write_mask(&dir.join("m1.tif"), mask_values);
		let out = dir.join("out.tif");
		run(&Subcommand {
			gamma: 1.0,
			nodata: "255".to_string(),
			compression: "raw".to_string(),
			background: None,
			background_mask: None,
			input1: Some(dir.join("i1.tif")),
			mask1: Some(dir.join("m1.tif")),
			input2: None,
			mask2: None,
			input3: None,
			mask3: None,
			input4: None,
			mask4: None,
			output: out.clone(),
			output_mask: Some(dir.join("mask.tif")),
		})
		.unwrap();

		let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
		let result = FileImage::open(&out, bbox, Crs::from_id("LOCAL")).unwrap();
		let mut line = vec![0u8; 2];
		result.read_line_u8(0, &mut line).unwrap();
		let value = line[0];
		let mask = FileImage::open(&dir.join("mask.tif"), bbox, Crs::from_id("LOCAL")).unwrap();
		mask.read_line_u8(0, &mut line).unwrap();
		(value, line[0])
	}

	#[test]
	fn single_valid_sample_keeps_nodata() {
		// one live sub-pixel out of four is not enough to average
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(merge_masked(dir.path(), [255, 0, 0, 0]), (255, 0));
	}

	#[test]
	fn two_valid_samples_are_averaged() {
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(merge_masked(dir.path(), [255, 255, 0, 0]), (80, 255));
	}

	#[test]
	fn missing_quadrant_becomes_nodata() {
		let dir = tempfile::tempdir().unwrap();
		write_tile(&dir.path().join("i1.tif"), 80.0);
		let out = dir.path().join("out.tif");
		run(&Subcommand {
			gamma: 1.0,
			nodata: "255".to_string(),
			compression: "raw".to_string(),
			background: None,
			background_mask: None,
			input1: Some(dir.path().join("i1.tif")),
			mask1: None,
			input2: None,
			mask2: None,
			input3: None,
			mask3: None,
			input4: None,
			mask4: None,
			output: out.clone(),
			output_mask: Some(dir.path().join("mask.tif")),
		})
		.unwrap();

		let result = FileImage::open(&out, BBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), Crs::from_id("LOCAL")).unwrap();
		let mut line = vec![0u8; 2];
		result.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![80, 255]);

		let mask = FileImage::open(&dir.path().join("mask.tif"), BBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), Crs::from_id("LOCAL"))
			.unwrap();
		mask.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![255, 0]);
	}
}

//! Decimate N compatible images onto a coarser output, optionally over a
//! background image already at the output resolution. No resampling, no
//! reprojection: the output picks every k-th source pixel.

use super::common::{parse_image_list, parse_nodata, write_output, ImageEntry};
use anyhow::{Context, Result, ensure};
use rok4_core::format::Compression;
use rok4_image::{DecimatedImage, ExtendedCompoundImage, SharedImage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Configuration file: output image first, then the inputs; an input
	/// already at the output resolution acts as background
	#[arg(short = 'f', long = "file")]
	file: PathBuf,

	/// Output compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,

	/// Nodata, one value per output channel, comma separated
	#[arg(short = 'n', long)]
	nodata: String,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let (output, inputs) = parse_image_list(&arguments.file)?;
	let compression = Compression::from_tool_token(&arguments.compression)?;
	let nodata = parse_nodata(&arguments.nodata)?;

	let first = inputs[0].open(None)?;
	let target = output.meta(first.meta().channels(), first.meta().sample_format())?;

	// backgrounds (already at output resolution) go below the decimated
	// sources
	let mut backgrounds: Vec<SharedImage> = Vec::new();
	let mut decimated: Vec<SharedImage> = Vec::new();
	for (index, entry) in inputs.iter().enumerate() {
		let image = if index == 0 { first.clone() } else { entry.open(None)? };
		ensure!(
			image.meta().crs().id() == target.crs().id(),
			"input {:?} is in {}, output in {}",
			entry.path,
			image.meta().crs(),
			target.crs()
		);
		if image.meta().is_compatible_with(&target) {
			backgrounds.push(image);
		} else {
			// footprint on the output grid: every output pixel whose center
			// lands on a source pixel center
			let src = image.meta();
			let (res_x, res_y) = (target.res_x(), target.res_y());
			let col_min = ((src.bbox().xmin + src.res_x() / 2.0 - target.bbox().xmin) / res_x - 0.5 - 1e-9).ceil().max(0.0);
			let col_max = ((src.bbox().xmax - src.res_x() / 2.0 - target.bbox().xmin) / res_x - 0.5 + 1e-9).floor();
			let row_min = ((target.bbox().ymax - (src.bbox().ymax - src.res_y() / 2.0)) / res_y - 0.5 - 1e-9).ceil().max(0.0);
			let row_max = ((target.bbox().ymax - (src.bbox().ymin + src.res_y() / 2.0)) / res_y - 0.5 + 1e-9).floor();
			ensure!(
				col_min <= col_max && row_min <= row_max,
				"input {:?} does not intersect the output",
				entry.path
			);
			let cut = rok4_core::types::BBox::new(
				target.bbox().xmin + col_min * res_x,
				target.bbox().ymax - (row_max + 1.0) * res_y,
				target.bbox().xmin + (col_max + 1.0) * res_x,
				target.bbox().ymax - row_min * res_y,
			)?;
			let meta = rok4_image::ImageMeta::new(
				(col_max - col_min + 1.0) as u32,
				(row_max - row_min + 1.0) as u32,
				image.meta().channels(),
				image.meta().sample_format(),
				cut,
				target.crs().clone(),
			)?;
			decimated.push(Arc::new(
				DecimatedImage::new(image, meta).with_context(|| format!("decimating {:?}", entry.path))?,
			));
		}
	}

	let children: Vec<SharedImage> = backgrounds.into_iter().chain(decimated).collect();
	let image: SharedImage = Arc::new(ExtendedCompoundImage::new(target, children, nodata)?);
	write_output(&output, &image, compression)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;
	use rok4_image::file::write_tiff;
	use rok4_image::{EmptyImage, FileImage, ImageMeta, ImageNode};

	#[test]
	fn decimates_sources_over_a_background() -> Result<()> {
		let dir = tempfile::tempdir()?;

		// background at output resolution (2), covering everything
		let bg_meta = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
			Crs::from_id("EPSG:2154"),
		)?;
		write_tiff(
			&dir.path().join("bg.tif"),
			&EmptyImage::new(bg_meta, vec![100.0]),
			Compression::None,
		)?;

		// one fine source (resolution 1) covering the north-west quarter,
		// phased so its pixel centers land on output centers
		let src_meta = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Uint8,
			BBox::new(0.5, 3.5, 4.5, 7.5).unwrap(),
			Crs::from_id("EPSG:2154"),
		)?;
		write_tiff(
			&dir.path().join("fine.tif"),
			&EmptyImage::new(src_meta, vec![7.0]),
			Compression::None,
		)?;

		let list = dir.path().join("images.list");
		let out = dir.path().join("out.tif");
		std::fs::write(
			&list,
			format!(
				"IMG {} EPSG:2154 0 8 8 0 2 2\n\
				 IMG {} EPSG:2154 0 8 8 0 2 2\n\
				 IMG {} EPSG:2154 0.5 7.5 4.5 3.5 1 1\n",
				out.display(),
				dir.path().join("bg.tif").display(),
				dir.path().join("fine.tif").display()
			),
		)?;

		run(&Subcommand {
			file: list,
			compression: "raw".to_string(),
			nodata: "255".to_string(),
		})?;

		let result = FileImage::open(&out, BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), Crs::from_id("EPSG:2154"))?;
		let mut line = vec![0u8; 4];
		result.read_line_u8(0, &mut line)?;
		// the decimated source wins over the background where it has data
		assert_eq!(line, vec![7, 7, 100, 100]);
		result.read_line_u8(3, &mut line)?;
		assert_eq!(line, vec![100; 4]);
		Ok(())
	}
}

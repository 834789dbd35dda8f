//! N-way blending of equally-sized images.
//!
//! Children are given back to front. All computation happens in unassociated
//! RGBA; each child line is expanded to RGBA first, the blended line is then
//! reduced to the output channel count with the standard channel rules. The
//! `TRANSPARENCY` token of the historical configuration format has no
//! defined semantics and is rejected at parse time.

use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, bail, ensure};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
	/// Last child with data at the pixel wins.
	Top,
	/// Unassociated alpha compositing, back to front.
	AlphaTop,
	/// Per-channel product, normalized by the sample maximum.
	Multiply,
	/// Per-channel maximum.
	Lighten,
	/// Per-channel minimum.
	Darken,
	/// Only the OR of the masks matters; the color is the background.
	Mask,
}

impl FromStr for MergeMethod {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.to_uppercase().as_str() {
			"TOP" => MergeMethod::Top,
			"ALPHATOP" => MergeMethod::AlphaTop,
			"MULTIPLY" => MergeMethod::Multiply,
			"LIGHTEN" => MergeMethod::Lighten,
			"DARKEN" => MergeMethod::Darken,
			"MASK" => MergeMethod::Mask,
			"TRANSPARENCY" => bail!("merge method TRANSPARENCY is not implemented"),
			_ => bail!("unknown merge method '{value}'"),
		})
	}
}

pub struct MergeImage {
	meta: ImageMeta,
	children: Vec<SharedImage>,
	method: MergeMethod,
	/// One value per output channel, unassociated alpha.
	background: Vec<u8>,
	/// RGB triple mapped to alpha 0 before blending.
	transparent: Option<[u8; 3]>,
	mask: MergeMask,
}

impl MergeImage {
	pub fn new(
		children: Vec<SharedImage>,
		method: MergeMethod,
		out_channels: u16,
		background: Vec<u8>,
		transparent: Option<[u8; 3]>,
	) -> Result<MergeImage> {
		ensure!(!children.is_empty(), "a merge needs at least one child");
		let first = children[0].meta();
		for child in &children[1..] {
			ensure!(
				child.meta().width() == first.width() && child.meta().height() == first.height(),
				"all merged images must share dimensions"
			);
		}
		ensure!(
			background.len() >= out_channels as usize,
			"background must provide {out_channels} values"
		);
		let meta = ImageMeta::new(
			first.width(),
			first.height(),
			out_channels,
			first.sample_format(),
			*first.bbox(),
			first.crs().clone(),
		)?;
		let mask = MergeMask {
			meta: ImageMeta::new(
				first.width(),
				first.height(),
				1,
				rok4_core::format::SampleFormat::Uint8,
				*first.bbox(),
				first.crs().clone(),
			)?,
			children: children.clone(),
		};
		Ok(MergeImage {
			meta,
			children,
			method,
			background,
			transparent,
			mask,
		})
	}

	/// Child line expanded to unassociated RGBA, with the transparent color
	/// mapped to alpha 0.
	fn rgba_line(&self, child: &dyn ImageNode, y: u32) -> Result<Vec<[u8; 4]>> {
		let channels = child.meta().channels() as usize;
		let mut line = vec![0u8; child.meta().line_len()];
		child.read_line_u8(y, &mut line)?;
		let mut out = Vec::with_capacity(child.meta().width() as usize);
		for pixel in line.chunks_exact(channels) {
			let rgba = match channels {
				1 => [pixel[0], pixel[0], pixel[0], 255],
				2 => [pixel[0], pixel[0], pixel[0], pixel[1]],
				3 => [pixel[0], pixel[1], pixel[2], 255],
				_ => [pixel[0], pixel[1], pixel[2], pixel[3]],
			};
			out.push(rgba);
		}
		if let Some(transparent) = self.transparent {
			for rgba in &mut out {
				if rgba[..3] == transparent {
					rgba[3] = 0;
				}
			}
		}
		Ok(out)
	}

	fn background_rgba(&self) -> [u8; 4] {
		let b = &self.background;
		match self.meta.channels() {
			1 => [b[0], b[0], b[0], 255],
			2 => [b[0], b[0], b[0], b[1]],
			3 => [b[0], b[1], b[2], 255],
			_ => [b[0], b[1], b[2], b[3]],
		}
	}

	/// Reduces an RGBA pixel to the output channel count.
	fn reduce(&self, rgba: [f32; 4], out: &mut [u8]) {
		let gray = || (0.2125 * rgba[0] + 0.7154 * rgba[1] + 0.0721 * rgba[2]).round() as u8;
		match self.meta.channels() {
			1 => out[0] = gray(),
			2 => {
				out[0] = gray();
				out[1] = rgba[3].round() as u8;
			}
			3 => {
				for c in 0..3 {
					out[c] = rgba[c].round() as u8;
				}
			}
			_ => {
				for c in 0..4 {
					out[c] = rgba[c].round() as u8;
				}
			}
		}
	}
}

impl ImageNode for MergeImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		Some(&self.mask)
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let width = self.meta.width() as usize;
		let channels = self.meta.channels() as usize;
		let background = self.background_rgba();
		let mut acc: Vec<[f32; 4]> = vec![background.map(f32::from); width];

		match self.method {
			MergeMethod::Mask => {}
			MergeMethod::Top => {
				for child in &self.children {
					let line = self.rgba_line(child.as_ref(), y)?;
					let mask_line = read_child_mask(child.as_ref(), y)?;
					for (x, rgba) in line.iter().enumerate() {
						if mask_line.as_ref().map_or(true, |m| m[x] != 0) {
							acc[x] = rgba.map(f32::from);
						}
					}
				}
			}
			MergeMethod::AlphaTop => {
				// accumulate premultiplied, back to front
				for pixel in &mut acc {
					let alpha = pixel[3] / 255.0;
					for c in 0..3 {
						pixel[c] *= alpha;
					}
				}
				for child in &self.children {
					let line = self.rgba_line(child.as_ref(), y)?;
					for (x, rgba) in line.iter().enumerate() {
						let alpha = f32::from(rgba[3]) / 255.0;
						for c in 0..3 {
							acc[x][c] = (1.0 - alpha) * acc[x][c] + alpha * f32::from(rgba[c]);
						}
						acc[x][3] = 255.0 * (1.0 - (1.0 - acc[x][3] / 255.0) * (1.0 - alpha));
					}
				}
				// back to unassociated alpha
				for pixel in &mut acc {
					let alpha = pixel[3] / 255.0;
					if alpha > 0.0 {
						for c in 0..3 {
							pixel[c] = (pixel[c] / alpha).min(255.0);
						}
					}
				}
			}
			MergeMethod::Multiply => {
				for child in &self.children {
					let line = self.rgba_line(child.as_ref(), y)?;
					for (x, rgba) in line.iter().enumerate() {
						for c in 0..4 {
							acc[x][c] = acc[x][c] * f32::from(rgba[c]) / 255.0;
						}
					}
				}
			}
			MergeMethod::Lighten | MergeMethod::Darken => {
				let lighten = self.method == MergeMethod::Lighten;
				for child in &self.children {
					let line = self.rgba_line(child.as_ref(), y)?;
					for (x, rgba) in line.iter().enumerate() {
						for c in 0..3 {
							let v = f32::from(rgba[c]);
							acc[x][c] = if lighten { acc[x][c].max(v) } else { acc[x][c].min(v) };
						}
						acc[x][3] = acc[x][3].max(f32::from(rgba[3]));
					}
				}
			}
		}

		for (x, pixel) in acc.iter().enumerate() {
			self.reduce(*pixel, &mut buffer[x * channels..(x + 1) * channels]);
		}
		Ok(())
	}
}

fn read_child_mask(child: &dyn ImageNode, y: u32) -> Result<Option<Vec<u8>>> {
	match child.mask() {
		None => Ok(None),
		Some(mask) => {
			let mut line = vec![0u8; mask.meta().line_len()];
			mask.read_line_u8(y, &mut line)?;
			Ok(Some(line))
		}
	}
}

/// OR of the child masks; a child without a mask makes the merge fully
/// opaque.
pub struct MergeMask {
	meta: ImageMeta,
	children: Vec<SharedImage>,
}

impl ImageNode for MergeMask {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let width = self.meta.width() as usize;
		buffer[..width].fill(0);
		for child in &self.children {
			match read_child_mask(child.as_ref(), y)? {
				None => {
					buffer[..width].fill(255);
					return Ok(());
				}
				Some(line) => {
					for (out, value) in buffer[..width].iter_mut().zip(&line) {
						if *value != 0 {
							*out = *value;
						}
					}
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::empty::EmptyImage;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;
	use std::sync::Arc;

	fn rgba(value: [f32; 4]) -> SharedImage {
		Arc::new(EmptyImage::new(
			ImageMeta::new(
				4,
				1,
				4,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 4.0, 1.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
			value.to_vec(),
		))
	}

	fn rgb(value: [f32; 3]) -> SharedImage {
		Arc::new(EmptyImage::new(
			ImageMeta::new(
				4,
				1,
				3,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 4.0, 1.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
			value.to_vec(),
		))
	}

	#[test]
	fn transparency_token_is_rejected() {
		assert!("TRANSPARENCY".parse::<MergeMethod>().is_err());
		assert!("ALPHATOP".parse::<MergeMethod>().is_ok());
	}

	#[test]
	fn top_takes_the_last_opaque_child() {
		let merge = MergeImage::new(
			vec![rgb([10.0, 10.0, 10.0]), rgb([20.0, 20.0, 20.0])],
			MergeMethod::Top,
			3,
			vec![0, 0, 0],
			None,
		)
		.unwrap();
		let mut line = vec![0u8; 12];
		merge.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[20, 20, 20]);
	}

	#[test]
	fn alphatop_composites_over_background() {
		// front layer at 50% over an opaque back layer
		let merge = MergeImage::new(
			vec![rgb([100.0, 100.0, 100.0]), rgba([200.0, 200.0, 200.0, 127.5])],
			MergeMethod::AlphaTop,
			3,
			vec![0, 0, 0],
			None,
		)
		.unwrap();
		let mut line = vec![0u8; 12];
		merge.read_line_u8(0, &mut line).unwrap();
		// 0.5*100 + 0.5*200 = 150
		assert!((i16::from(line[0]) - 150).abs() <= 1, "got {}", line[0]);
	}

	#[test]
	fn transparent_color_becomes_invisible() {
		let merge = MergeImage::new(
			vec![rgb([100.0, 100.0, 100.0]), rgb([255.0, 0.0, 255.0])],
			MergeMethod::AlphaTop,
			3,
			vec![0, 0, 0],
			Some([255, 0, 255]),
		)
		.unwrap();
		let mut line = vec![0u8; 12];
		merge.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[100, 100, 100]);
	}

	#[test]
	fn multiply_normalizes_by_max() {
		let merge = MergeImage::new(
			vec![rgb([128.0, 255.0, 0.0])],
			MergeMethod::Multiply,
			3,
			vec![255, 255, 255],
			None,
		)
		.unwrap();
		let mut line = vec![0u8; 12];
		merge.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[128, 255, 0]);
	}

	#[test]
	fn lighten_and_darken() {
		let children = || vec![rgb([10.0, 200.0, 90.0]), rgb([120.0, 50.0, 90.0])];
		let lighten = MergeImage::new(children(), MergeMethod::Lighten, 3, vec![0, 0, 0], None).unwrap();
		let darken = MergeImage::new(children(), MergeMethod::Darken, 3, vec![255, 255, 255], None).unwrap();
		let mut line = vec![0u8; 12];
		lighten.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[120, 200, 90]);
		darken.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[10, 50, 90]);
	}

	#[test]
	fn mask_method_keeps_the_background() {
		let merge = MergeImage::new(
			vec![rgb([1.0, 2.0, 3.0])],
			MergeMethod::Mask,
			3,
			vec![9, 8, 7],
			None,
		)
		.unwrap();
		let mut line = vec![0u8; 12];
		merge.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[9, 8, 7]);
		// the mask is fully opaque because the child carries none
		let mut mask_line = vec![0u8; 4];
		merge.mask().unwrap().read_line_u8(0, &mut mask_line).unwrap();
		assert_eq!(mask_line, vec![255; 4]);
	}

	#[test]
	fn mismatched_dimensions_are_refused() {
		let small: SharedImage = Arc::new(EmptyImage::new(
			ImageMeta::new(
				2,
				1,
				3,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 2.0, 1.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
			vec![0.0; 3],
		));
		assert!(MergeImage::new(vec![rgb([0.0; 3]), small], MergeMethod::Top, 3, vec![0, 0, 0], None).is_err());
	}
}

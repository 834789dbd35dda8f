//! Rotating 3-line window over a single-channel float source, shared by the
//! analytic derivations. Edge rows are duplicated by one (reflection).

use crate::traits::ImageNode;
use anyhow::{Result, ensure};

/// Calls `emit(y, above, current, below)` for every row of `source`.
pub(crate) fn sweep<F>(source: &dyn ImageNode, mut emit: F) -> Result<()>
where
	F: FnMut(u32, &[f32], &[f32], &[f32]),
{
	let meta = source.meta();
	ensure!(meta.channels() == 1, "analytic derivations need a single-channel source");
	ensure!(meta.height() >= 2, "analytic derivations need at least two rows");
	let width = meta.width() as usize;

	let mut lines = [vec![0f32; width], vec![0f32; width], vec![0f32; width]];
	source.read_line_f32(0, &mut lines[0])?;
	source.read_line_f32(1, &mut lines[1])?;

	// first row duplicates itself upward
	{
		let (above, rest) = lines.split_at(1);
		emit(0, &above[0], &above[0], &rest[0]);
	}

	let height = meta.height();
	for y in 1..height {
		let above = (y as usize - 1) % 3;
		let current = y as usize % 3;
		let below = (y as usize + 1) % 3;
		if y + 1 < height {
			let mut next = std::mem::take(&mut lines[below]);
			source.read_line_f32(y + 1, &mut next)?;
			lines[below] = next;
			emit(y, &lines[above], &lines[current], &lines[below]);
		} else {
			// last row duplicates itself downward
			emit(y, &lines[above], &lines[current], &lines[current]);
		}
	}
	Ok(())
}

/// Sample at `column + offset`, with the edge columns duplicated.
#[inline]
pub(crate) fn at(line: &[f32], column: usize, offset: i64) -> f32 {
	let index = (column as i64 + offset).clamp(0, line.len() as i64 - 1) as usize;
	line[index]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::traits::ImageMeta;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;

	struct RowIndex(ImageMeta);
	impl ImageNode for RowIndex {
		fn meta(&self) -> &ImageMeta {
			&self.0
		}
		fn read_line_u8(&self, _y: u32, _buffer: &mut [u8]) -> Result<()> {
			unreachable!()
		}
		fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
			buffer[..self.0.line_len()].fill(y as f32);
			Ok(())
		}
	}

	#[test]
	fn edges_reflect_by_one() {
		let source = RowIndex(
			ImageMeta::new(
				2,
				4,
				1,
				SampleFormat::Float32,
				BBox::new(0.0, 0.0, 2.0, 4.0).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
		);
		let mut seen = Vec::new();
		sweep(&source, |y, above, current, below| {
			seen.push((y, above[0], current[0], below[0]));
		})
		.unwrap();
		assert_eq!(
			seen,
			vec![
				(0, 0.0, 0.0, 1.0),
				(1, 0.0, 1.0, 2.0),
				(2, 1.0, 2.0, 3.0),
				(3, 2.0, 3.0, 3.0),
			]
		);
	}

	#[test]
	fn column_clamping() {
		let line = [5.0, 6.0, 7.0];
		assert_eq!(at(&line, 0, -1), 5.0);
		assert_eq!(at(&line, 1, -1), 5.0);
		assert_eq!(at(&line, 2, 1), 7.0);
	}
}

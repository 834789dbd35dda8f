//! Common shape of a decoded raster, shared by all file decoders.

use rok4_core::format::{ExtraSample, SampleFormat};

/// Raw samples in their native type.
#[derive(Debug)]
pub enum SampleBuffer {
	U8(Vec<u8>),
	U16(Vec<u16>),
	F32(Vec<f32>),
}

impl SampleBuffer {
	pub fn sample_format(&self) -> SampleFormat {
		match self {
			SampleBuffer::U8(_) => SampleFormat::Uint8,
			SampleBuffer::U16(_) => SampleFormat::Uint16,
			SampleBuffer::F32(_) => SampleFormat::Float32,
		}
	}

	pub fn len(&self) -> usize {
		match self {
			SampleBuffer::U8(v) => v.len(),
			SampleBuffer::U16(v) => v.len(),
			SampleBuffer::F32(v) => v.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A fully decoded raster as handed over by a decoder.
pub struct Decoded {
	pub width: u32,
	pub height: u32,
	pub channels: u16,
	pub extra_sample: ExtraSample,
	pub buffer: SampleBuffer,
}

impl Decoded {
	/// Un-premultiplies associated alpha in place. The pipeline computes in
	/// unassociated alpha only, so this runs once right after decoding.
	pub fn unassociate_alpha(&mut self) {
		if !self.extra_sample.is_associated() || !matches!(self.channels, 2 | 4) {
			return;
		}
		let channels = self.channels as usize;
		match &mut self.buffer {
			SampleBuffer::U8(data) => {
				for pixel in data.chunks_exact_mut(channels) {
					let alpha = pixel[channels - 1];
					if alpha != 0 && alpha != 255 {
						for sample in &mut pixel[..channels - 1] {
							*sample = ((u16::from(*sample) * 255 + u16::from(alpha) / 2) / u16::from(alpha)).min(255) as u8;
						}
					}
				}
			}
			SampleBuffer::U16(data) => {
				for pixel in data.chunks_exact_mut(channels) {
					let alpha = pixel[channels - 1];
					if alpha != 0 && alpha != 65535 {
						for sample in &mut pixel[..channels - 1] {
							*sample = ((u32::from(*sample) * 65535 + u32::from(alpha) / 2) / u32::from(alpha)).min(65535) as u16;
						}
					}
				}
			}
			SampleBuffer::F32(data) => {
				for pixel in data.chunks_exact_mut(channels) {
					let alpha = pixel[channels - 1];
					if alpha > 0.0 && alpha < 1.0 {
						for sample in &mut pixel[..channels - 1] {
							*sample /= alpha;
						}
					}
				}
			}
		}
		self.extra_sample = ExtraSample::AlphaUnassoc;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unassociation_is_self_inverse_up_to_rounding() {
		// associate, then unassociate: recover the original within 1
		let original = [200u8, 120, 40, 128];
		let mut associated: Vec<u8> = original
			.chunks(4)
			.flat_map(|p| {
				let a = u16::from(p[3]);
				[
					((u16::from(p[0]) * a + 127) / 255) as u8,
					((u16::from(p[1]) * a + 127) / 255) as u8,
					((u16::from(p[2]) * a + 127) / 255) as u8,
					p[3],
				]
			})
			.collect();
		let mut decoded = Decoded {
			width: 1,
			height: 1,
			channels: 4,
			extra_sample: ExtraSample::AlphaAssoc,
			buffer: SampleBuffer::U8(std::mem::take(&mut associated)),
		};
		decoded.unassociate_alpha();
		let SampleBuffer::U8(result) = &decoded.buffer else {
			panic!("buffer type changed")
		};
		for (got, want) in result.iter().zip(original.iter()) {
			assert!((i16::from(*got) - i16::from(*want)).abs() <= 1, "{got} vs {want}");
		}
		assert_eq!(decoded.extra_sample, ExtraSample::AlphaUnassoc);
	}

	#[test]
	fn unassociation_ignores_plain_color() {
		let mut decoded = Decoded {
			width: 1,
			height: 1,
			channels: 3,
			extra_sample: ExtraSample::AlphaAssoc,
			buffer: SampleBuffer::U8(vec![1, 2, 3]),
		};
		decoded.unassociate_alpha();
		let SampleBuffer::U8(result) = &decoded.buffer else {
			panic!("buffer type changed")
		};
		assert_eq!(result, &vec![1, 2, 3]);
	}
}

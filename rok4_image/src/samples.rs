//! Numeric conversions between the three sample types.
//!
//! Integer widths map linearly onto each other; floats live on `0.0..=1.0`
//! and convert to integers with clamping. Buffers must be at least as long
//! as the source slice.

pub fn u8_to_u16(src: &[u8], dst: &mut [u16]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = u16::from(*s) * 257;
	}
}

pub fn u16_to_u8(src: &[u16], dst: &mut [u8]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = (*s / 257) as u8;
	}
}

pub fn u8_to_f32(src: &[u8], dst: &mut [f32]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = f32::from(*s) / 255.0;
	}
}

pub fn f32_to_u8(src: &[f32], dst: &mut [u8]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = (s.clamp(0.0, 1.0) * 255.0).round() as u8;
	}
}

pub fn u16_to_f32(src: &[u16], dst: &mut [f32]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = f32::from(*s) / 65535.0;
	}
}

pub fn f32_to_u16(src: &[f32], dst: &mut [u16]) {
	for (d, s) in dst.iter_mut().zip(src) {
		*d = (s.clamp(0.0, 1.0) * 65535.0).round() as u16;
	}
}

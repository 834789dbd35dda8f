//! Interpolation kernels.
//!
//! A kernel defines how far it reaches into the source for a given
//! resampling ratio ([`size`](Kernel::size), the one-sided radius in source
//! pixels) and the weights it assigns to the source samples around a target
//! position. Downsampling (ratio > 1) widens the kernel by the ratio to keep
//! it band-limiting.

use anyhow::{Result, bail};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Kernel {
	NearestNeighbour,
	#[default]
	Linear,
	Cubic,
	Lanczos3,
}

impl Kernel {
	/// Base one-sided radius at ratio 1.
	fn radius(&self) -> f64 {
		match self {
			Kernel::NearestNeighbour => 0.5,
			Kernel::Linear => 1.0,
			Kernel::Cubic => 2.0,
			Kernel::Lanczos3 => 3.0,
		}
	}

	/// One-sided support in source pixels for the resampling `ratio`
	/// (target resolution / source resolution).
	pub fn size(&self, ratio: f64) -> f64 {
		self.radius() * ratio.max(1.0)
	}

	/// Weight of a source sample at distance `d` (in source pixels, scaled
	/// by the ratio before the call).
	fn weight(&self, d: f64) -> f64 {
		let d = d.abs();
		match self {
			Kernel::NearestNeighbour => {
				if d <= 0.5 { 1.0 } else { 0.0 }
			}
			Kernel::Linear => (1.0 - d).max(0.0),
			Kernel::Cubic => {
				// Catmull-Rom (a = -0.5)
				if d < 1.0 {
					1.5 * d * d * d - 2.5 * d * d + 1.0
				} else if d < 2.0 {
					-0.5 * d * d * d + 2.5 * d * d - 4.0 * d + 2.0
				} else {
					0.0
				}
			}
			Kernel::Lanczos3 => {
				if d < 1e-12 {
					1.0
				} else if d < 3.0 {
					let pi_d = std::f64::consts::PI * d;
					3.0 * pi_d.sin() * (pi_d / 3.0).sin() / (pi_d * pi_d)
				} else {
					0.0
				}
			}
		}
	}

	/// Normalized weights of the source samples around source position
	/// `center` for the resampling `ratio`. Returns the index of the first
	/// weighted sample; indices may run outside `0..source_len` and must be
	/// clamped or mirrored by the caller.
	pub fn weights(&self, center: f64, ratio: f64) -> (i64, Vec<f64>) {
		if *self == Kernel::NearestNeighbour {
			return (center.round() as i64, vec![1.0]);
		}
		let support = self.size(ratio);
		let scale = ratio.max(1.0);
		let first = (center - support).ceil() as i64;
		let last = (center + support).floor() as i64;
		let mut weights: Vec<f64> = (first..=last).map(|i| self.weight((i as f64 - center) / scale)).collect();
		let sum: f64 = weights.iter().sum();
		if sum.abs() > 1e-12 {
			for w in &mut weights {
				*w /= sum;
			}
		} else {
			// degenerate support: fall back to the nearest sample
			weights = vec![1.0];
			return (center.round() as i64, weights);
		}
		(first, weights)
	}
}

impl FromStr for Kernel {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().as_str() {
			"nn" | "nearest_neighbour" | "nearest" => Kernel::NearestNeighbour,
			"linear" => Kernel::Linear,
			"bicubic" | "cubic" => Kernel::Cubic,
			"lanczos" | "lanczos_3" | "lanczos3" => Kernel::Lanczos3,
			_ => bail!("unknown interpolation '{value}'"),
		})
	}
}

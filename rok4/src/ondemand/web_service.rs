//! Upstream WMS client.
//!
//! Issues GetMap requests with bounded retries, decodes JPEG/PNG bodies and
//! restores the requested geometry when the upstream answers with a
//! different one. Areas larger than the configured cell size are split into
//! a grid of at most `DEFAULT_MAX_NB_CUT` × `DEFAULT_MAX_NB_CUT` requests
//! reassembled as a compound; a failed cell degrades to nodata instead of
//! failing the whole request.

use anyhow::{Context, Result, bail};
use rok4_core::crs::Crs;
use rok4_core::format::SampleFormat;
use rok4_core::types::{BBox, Blob};
use rok4_image::file::{Decoded, SampleBuffer};
use rok4_image::{CompoundImage, EmptyImage, ExtendedCompoundImage, ImageMeta, SharedImage};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Maximum grid subdivision per axis when a request area exceeds the cell
/// size.
pub const DEFAULT_MAX_NB_CUT: u32 = 5;

/// Requests whose target shrinks below 3 px with a shrink ratio above 5 are
/// not worth an upstream round-trip.
const MIN_SIZE: u32 = 3;
const MAX_SHRINK: f64 = 5.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebServiceConfig {
	pub url: String,
	pub layers: String,
	#[serde(default)]
	pub styles: String,
	/// `image/jpeg` or `image/png`.
	pub format: String,
	#[serde(default = "default_version")]
	pub version: String,
	pub crs: String,
	pub channels: u16,
	/// Declared coverage, in `crs` units.
	pub coverage: [f64; 4],
	#[serde(default = "default_timeout")]
	pub timeout: u64,
	#[serde(default = "default_retry")]
	pub retry: u32,
	#[serde(default = "default_interval")]
	pub interval: u64,
	/// Largest width/height of a single upstream request, in pixels.
	#[serde(default = "default_cell")]
	pub max_cell_size: u32,
	/// Extra query options appended verbatim.
	#[serde(default)]
	pub extra_query: String,
}

fn default_version() -> String {
	"1.3.0".to_string()
}
fn default_timeout() -> u64 {
	10
}
fn default_retry() -> u32 {
	2
}
fn default_interval() -> u64 {
	1
}
fn default_cell() -> u32 {
	1024
}

pub struct WebService {
	config: WebServiceConfig,
	crs: Crs,
	coverage: BBox,
	client: reqwest::blocking::Client,
}

impl WebService {
	pub fn new(config: WebServiceConfig) -> Result<WebService> {
		if config.format != "image/jpeg" && config.format != "image/png" {
			bail!("web service format must be image/jpeg or image/png, got '{}'", config.format);
		}
		let client = reqwest::blocking::Client::builder()
			.timeout(Duration::from_secs(config.timeout))
			.user_agent(crate::ROK4_INFO)
			.build()
			.context("building WMS client")?;
		let crs = Crs::from_id(&config.crs);
		let [xmin, ymin, xmax, ymax] = config.coverage;
		Ok(WebService {
			crs,
			coverage: BBox::new(xmin, ymin, xmax, ymax)?,
			config,
			client,
		})
	}

	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	pub fn coverage(&self) -> &BBox {
		&self.coverage
	}

	pub fn channels(&self) -> u16 {
		self.config.channels
	}

	/// Builds the GetMap query for one cell. WMS 1.3.0 swaps the bbox axis
	/// order for lat/lon geographic CRSs.
	pub fn get_map_url(&self, bbox: &BBox, width: u32, height: u32) -> String {
		let c = &self.config;
		let crs_key = if c.version.starts_with("1.3") { "CRS" } else { "SRS" };
		let bbox_value = if c.version.starts_with("1.3") && self.crs.is_latlon_order() {
			format!("{},{},{},{}", bbox.ymin, bbox.xmin, bbox.ymax, bbox.xmax)
		} else {
			format!("{},{},{},{}", bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax)
		};
		let mut url = format!(
			"{}?SERVICE=WMS&REQUEST=GetMap&VERSION={}&LAYERS={}&STYLES={}&FORMAT={}&{}={}&BBOX={}&WIDTH={}&HEIGHT={}",
			c.url, c.version, c.layers, c.styles, c.format, crs_key, self.crs.id(), bbox_value, width, height
		);
		if !c.extra_query.is_empty() {
			url.push('&');
			url.push_str(&c.extra_query);
		}
		url
	}

	/// One upstream round-trip with retries, decoded to raw samples.
	fn fetch_cell(&self, bbox: &BBox, width: u32, height: u32) -> Result<Decoded> {
		let url = self.get_map_url(bbox, width, height);
		let mut last_error = None;
		for attempt in 0..=self.config.retry {
			if attempt > 0 {
				std::thread::sleep(Duration::from_secs(self.config.interval));
			}
			log::debug!("WMS GetMap ({}/{}): {url}", attempt + 1, self.config.retry + 1);
			match self.try_fetch(&url) {
				Ok(decoded) => return Ok(decoded),
				Err(error) => {
					log::warn!("WMS GetMap attempt {} failed: {error:#}", attempt + 1);
					last_error = Some(error);
				}
			}
		}
		Err(last_error.unwrap())
	}

	fn try_fetch(&self, url: &str) -> Result<Decoded> {
		let response = self.client.get(url).send().context("sending GetMap")?;
		if !response.status().is_success() {
			bail!("upstream answered {}", response.status());
		}
		let mime = response
			.headers()
			.get("content-type")
			.and_then(|v| v.to_str().ok())
			.unwrap_or("")
			.to_string();
		let body = Blob::from(response.bytes().context("reading GetMap body")?.to_vec());
		let format = match mime.split(';').next().unwrap_or("") {
			"image/png" => image::ImageFormat::Png,
			"image/jpeg" | "image/jpg" => image::ImageFormat::Jpeg,
			other => bail!("upstream answered with unusable content type '{other}'"),
		};
		let dynamic = image::load_from_memory_with_format(body.as_slice(), format).context("decoding GetMap body")?;
		rok4_image::file::from_dynamic(dynamic)
	}

	/// Image node for `bbox` at `width`×`height`, or `None` when the area
	/// shrinks below the usefulness floor after adaptation to the coverage.
	pub fn image_for(&self, bbox: &BBox, width: u32, height: u32, nodata: &[f32]) -> Result<Option<SharedImage>> {
		let target_meta = ImageMeta::new(
			width,
			height,
			self.config.channels,
			SampleFormat::Uint8,
			*bbox,
			self.crs.clone(),
		)?;

		// adapt the request to the declared coverage, staying on the pixel
		// grid of the original request
		let res_x = bbox.width() / f64::from(width);
		let res_y = bbox.height() / f64::from(height);
		let mut cropped = *bbox;
		cropped.cut_intersection_with(&self.coverage);
		if cropped.is_null() {
			return Ok(None);
		}
		let cropped = cropped.adapt_to(bbox, res_x, res_y);
		let ratio_x = cropped.width() / bbox.width();
		let ratio_y = cropped.height() / bbox.height();
		let request_width = (cropped.width() / res_x).round().max(1.0) as u32;
		let request_height = (cropped.height() / res_y).round().max(1.0) as u32;
		if (request_width < MIN_SIZE && 1.0 / ratio_x > MAX_SHRINK)
			|| (request_height < MIN_SIZE && 1.0 / ratio_y > MAX_SHRINK)
		{
			// not worth asking upstream: placeholder at target size
			return Ok(None);
		}

		let fetched = self.fetch_region(&cropped, request_width, request_height, nodata)?;
		if cropped == *bbox && fetched.meta().width() == width && fetched.meta().height() == height {
			return Ok(Some(fetched));
		}
		// restore the requested geometry around the cropped answer
		Ok(Some(Arc::new(ExtendedCompoundImage::new(
			target_meta,
			vec![fetched],
			nodata.to_vec(),
		)?)))
	}

	/// Fetches a region, splitting it into a grid of cells when it exceeds
	/// the configured cell size. Failed cells become nodata.
	fn fetch_region(&self, bbox: &BBox, width: u32, height: u32, nodata: &[f32]) -> Result<SharedImage> {
		let cell = self.config.max_cell_size;
		let cuts_x = width.div_ceil(cell).clamp(1, DEFAULT_MAX_NB_CUT);
		let cuts_y = height.div_ceil(cell).clamp(1, DEFAULT_MAX_NB_CUT);
		if cuts_x == 1 && cuts_y == 1 {
			return Ok(self.cell_image(bbox, width, height, nodata));
		}

		let mut children: Vec<SharedImage> = Vec::new();
		let res_x = bbox.width() / f64::from(width);
		let res_y = bbox.height() / f64::from(height);
		let mut row_start = 0u32;
		for cut_y in 0..cuts_y {
			let rows = (height - row_start) / (cuts_y - cut_y);
			let mut col_start = 0u32;
			for cut_x in 0..cuts_x {
				let cols = (width - col_start) / (cuts_x - cut_x);
				let cell_bbox = BBox {
					xmin: bbox.xmin + f64::from(col_start) * res_x,
					xmax: bbox.xmin + f64::from(col_start + cols) * res_x,
					ymax: bbox.ymax - f64::from(row_start) * res_y,
					ymin: bbox.ymax - f64::from(row_start + rows) * res_y,
				};
				children.push(self.cell_image(&cell_bbox, cols, rows, nodata));
				col_start += cols;
			}
			row_start += rows;
		}
		Ok(Arc::new(CompoundImage::new(children, cuts_x as usize)?))
	}

	fn cell_image(&self, bbox: &BBox, width: u32, height: u32, nodata: &[f32]) -> SharedImage {
		let meta = ImageMeta::new(
			width,
			height,
			self.config.channels,
			SampleFormat::Uint8,
			*bbox,
			self.crs.clone(),
		)
		.expect("cell geometry is valid by construction");

		match self.fetch_cell(bbox, width, height) {
			Ok(decoded) if decoded.width == width && decoded.height == height && decoded.channels == self.config.channels => {
				match decoded.buffer {
					SampleBuffer::U8(data) => match rok4_container::TileImage::from_raw(meta.clone(), Blob::from(data)) {
						Ok(tile) => return Arc::new(tile),
						Err(error) => log::warn!("discarding upstream cell: {error:#}"),
					},
					_ => log::warn!("discarding upstream cell: not 8-bit"),
				}
			}
			Ok(decoded) => {
				log::warn!(
					"upstream cell is {}x{}x{}, expected {width}x{height}x{}; treating as nodata",
					decoded.width,
					decoded.height,
					decoded.channels,
					self.config.channels
				);
			}
			Err(error) => {
				log::warn!("upstream cell failed, filling with nodata: {error:#}");
			}
		}
		Arc::new(EmptyImage::new(meta, nodata.to_vec()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn service(version: &str, crs: &str) -> WebService {
		WebService::new(WebServiceConfig {
			url: "http://upstream.example/wms".to_string(),
			layers: "ortho".to_string(),
			styles: String::new(),
			format: "image/jpeg".to_string(),
			version: version.to_string(),
			crs: crs.to_string(),
			channels: 3,
			coverage: [-180.0, -85.0, 180.0, 85.0],
			timeout: 1,
			retry: 0,
			interval: 0,
			max_cell_size: 1024,
			extra_query: "TRANSPARENT=TRUE".to_string(),
		})
		.unwrap()
	}

	#[test]
	fn get_map_url_130_swaps_latlon_axes() {
		let ws = service("1.3.0", "EPSG:4326");
		let url = ws.get_map_url(&BBox::new(1.0, 2.0, 3.0, 4.0).unwrap(), 256, 128);
		assert!(url.contains("CRS=EPSG:4326"));
		assert!(url.contains("BBOX=2,1,4,3"));
		assert!(url.contains("WIDTH=256&HEIGHT=128"));
		assert!(url.ends_with("&TRANSPARENT=TRUE"));
	}

	#[test]
	fn get_map_url_111_keeps_xy() {
		let ws = service("1.1.1", "EPSG:4326");
		let url = ws.get_map_url(&BBox::new(1.0, 2.0, 3.0, 4.0).unwrap(), 256, 128);
		assert!(url.contains("SRS=EPSG:4326"));
		assert!(url.contains("BBOX=1,2,3,4"));
	}

	#[test]
	fn mercator_crs_keeps_xy_in_130() {
		let ws = service("1.3.0", "EPSG:3857");
		let url = ws.get_map_url(&BBox::new(1.0, 2.0, 3.0, 4.0).unwrap(), 64, 64);
		assert!(url.contains("BBOX=1,2,3,4"));
	}

	#[test]
	fn out_of_coverage_is_none() {
		let ws = service("1.3.0", "EPSG:4326");
		let bbox = BBox::new(200.0, 10.0, 210.0, 20.0).unwrap();
		assert!(ws.image_for(&bbox, 256, 256, &[255.0; 3]).unwrap().is_none());
	}

	#[test]
	fn tiny_shrunk_requests_are_skipped() {
		let ws = service("1.3.0", "EPSG:4326");
		// barely clips the coverage edge: 1% of the width remains
		let bbox = BBox::new(179.0, 0.0, 279.0, 100.0).unwrap();
		assert!(ws.image_for(&bbox, 100, 100, &[255.0; 3]).unwrap().is_none());
	}

	#[test]
	fn unreachable_upstream_degrades_to_nodata() {
		let ws = service("1.3.0", "EPSG:4326");
		let bbox = BBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
		let image = ws.image_for(&bbox, 64, 64, &[200.0, 100.0, 50.0]).unwrap().unwrap();
		let mut line = vec![0u8; 64 * 3];
		image.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[200, 100, 50]);
	}

	#[test]
	fn refuses_unknown_formats() {
		let mut config = WebServiceConfig {
			url: String::new(),
			layers: String::new(),
			styles: String::new(),
			format: "image/webp".to_string(),
			version: default_version(),
			crs: "EPSG:4326".to_string(),
			channels: 3,
			coverage: [0.0, 0.0, 1.0, 1.0],
			timeout: 1,
			retry: 0,
			interval: 0,
			max_cell_size: 1024,
			extra_query: String::new(),
		};
		assert!(WebService::new(config.clone()).is_err());
		config.format = "image/png".to_string();
		assert!(WebService::new(config).is_ok());
	}
}

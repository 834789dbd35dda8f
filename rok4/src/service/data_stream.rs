//! The unit of response: status, content type, body.

use rok4_core::types::Blob;

#[derive(Debug)]
pub struct DataStream {
	pub status: u16,
	pub content_type: String,
	pub body: Blob,
}

impl DataStream {
	pub fn ok(content_type: &str, body: Blob) -> DataStream {
		DataStream {
			status: 200,
			content_type: content_type.to_string(),
			body,
		}
	}
}

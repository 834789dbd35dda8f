//! OGC ServiceException rendering.

use super::data_stream::DataStream;
use rok4_core::error::ServiceError;
use rok4_core::types::Blob;

fn escape(text: &str) -> String {
	text
		.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
}

/// Renders a service error as an OGC ServiceExceptionReport with the HTTP
/// status of its kind.
pub fn exception_stream(error: &ServiceError) -> DataStream {
	let locator = error
		.locator()
		.map(|l| format!(" locator=\"{}\"", escape(l)))
		.unwrap_or_default();
	let body = format!(
		"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
		<ServiceExceptionReport version=\"1.3.0\" xmlns=\"http://www.opengis.net/ogc\">\n\
		  <ServiceException code=\"{}\"{locator}>{}</ServiceException>\n\
		</ServiceExceptionReport>\n",
		error.ogc_code(),
		escape(error.message())
	);
	DataStream {
		status: error.http_status(),
		content_type: "text/xml".to_string(),
		body: Blob::from(body),
	}
}

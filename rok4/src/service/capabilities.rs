//! Capabilities documents.
//!
//! Full OGC capabilities generation is a collaborator concern; the serving
//! core only needs something that answers the operation. [`BasicCapabilities`]
//! produces a minimal, valid-enough document listing the offered layers;
//! deployments wanting the full metadata plug their own
//! [`CapabilitiesSource`].

use rok4_core::types::Blob;

pub trait CapabilitiesSource: Send + Sync {
	fn wms_capabilities(&self) -> Blob;
	fn wmts_capabilities(&self) -> Blob;
}

pub struct BasicCapabilities {
	service_title: String,
	layers: Vec<(String, String)>,
}

impl BasicCapabilities {
	pub fn new(service_title: &str, layers: Vec<(String, String)>) -> BasicCapabilities {
		BasicCapabilities {
			service_title: service_title.to_string(),
			layers,
		}
	}

	fn layer_list(&self, tag: &str) -> String {
		self
			.layers
			.iter()
			.map(|(id, title)| format!("    <{tag}><Name>{id}</Name><Title>{title}</Title></{tag}>\n"))
			.collect()
	}
}

impl CapabilitiesSource for BasicCapabilities {
	fn wms_capabilities(&self) -> Blob {
		Blob::from(format!(
			"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
			<WMS_Capabilities version=\"1.3.0\" xmlns=\"http://www.opengis.net/wms\">\n\
			  <Service><Name>WMS</Name><Title>{}</Title></Service>\n\
			  <Capability>\n{}  </Capability>\n\
			</WMS_Capabilities>\n",
			self.service_title,
			self.layer_list("Layer")
		))
	}

	fn wmts_capabilities(&self) -> Blob {
		Blob::from(format!(
			"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
			<Capabilities version=\"1.0.0\" xmlns=\"http://www.opengis.net/wmts/1.0\">\n\
			  <ows:ServiceIdentification xmlns:ows=\"http://www.opengis.net/ows/1.1\">\n\
			    <ows:Title>{}</ows:Title>\n\
			  </ows:ServiceIdentification>\n\
			  <Contents>\n{}  </Contents>\n\
			</Capabilities>\n",
			self.service_title,
			self.layer_list("Layer")
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lists_layers() {
		let caps = BasicCapabilities::new("ROK4", vec![("ortho".into(), "Orthophotos".into())]);
		let wms = caps.wms_capabilities();
		assert!(wms.as_str().contains("<Name>ortho</Name>"));
		assert!(wms.as_str().contains("WMS_Capabilities"));
		assert!(caps.wmts_capabilities().as_str().contains("Contents"));
	}
}

//! On-demand tile synthesis: assembling a requested image from the ordered
//! source list of a level (other pyramids and upstream WMS services).

mod synthesizer;
mod web_service;

pub use synthesizer::{synthesize, SynthesisRequest};
pub use web_service::{WebService, WebServiceConfig, DEFAULT_MAX_NB_CUT};

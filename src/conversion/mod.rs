//! Payload conversion
//!
//! Converts job inputs into WebUI requests and WebUI results into job
//! outputs.

pub mod request_converter;
pub mod response_converter;

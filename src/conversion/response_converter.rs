//! WebUI result to job output conversion
//!
//! Successful responses are returned verbatim. Failures become an object with
//! an `error` message and a `status_code`, so the caller always receives JSON.

use crate::conversion::request_converter::PayloadError;
use crate::core::client::WebUiError;
use crate::core::constants::field;
use serde_json::{Map, Value};

/// Status used for network failures and timeouts
const STATUS_UNAVAILABLE: u16 = 503;

/// Status used for unexpected failures
const STATUS_INTERNAL: u16 = 500;

/// Status used for job inputs that cannot be forwarded
const STATUS_BAD_REQUEST: u16 = 400;

/// Build an error output object
pub fn error_output(message: impl Into<String>, status_code: u16) -> Value {
    let mut output = Map::new();
    output.insert(field::ERROR.to_string(), Value::String(message.into()));
    output.insert(field::STATUS_CODE.to_string(), Value::from(status_code));
    Value::Object(output)
}

/// Convert the outcome of a WebUI call into a job output
pub fn convert_webui_result(result: Result<Value, WebUiError>) -> Value {
    match result {
        Ok(response) => response,
        Err(e) => convert_webui_error(&e),
    }
}

/// Map a WebUI error to an error output
pub fn convert_webui_error(error: &WebUiError) -> Value {
    match error {
        WebUiError::Http { status, body } => error_output(
            format!(
                "AUTOMATIC1111 API HTTP Error: {} - Status: {} - Response: {}",
                status_reason(*status),
                status,
                body
            ),
            *status,
        ),
        WebUiError::Request(e) => error_output(
            format!("AUTOMATIC1111 API Request Error: {}", e),
            STATUS_UNAVAILABLE,
        ),
        WebUiError::Decode(message) => unexpected_error(message),
    }
}

/// Map a payload preparation error to an error output
pub fn convert_payload_error(error: &PayloadError) -> Value {
    error_output(format!("Invalid job input: {}", error), STATUS_BAD_REQUEST)
}

/// Error output for failures outside the WebUI call
pub fn unexpected_error(detail: impl std::fmt::Display) -> Value {
    error_output(
        format!("An unexpected error occurred in the handler: {}", detail),
        STATUS_INTERNAL,
    )
}

fn status_reason(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status) {
        Ok(code) => match code.canonical_reason() {
            Some(reason) => format!("{} {}", status, reason),
            None => status.to_string(),
        },
        Err(_) => status.to_string(),
    }
}

//! Job input to WebUI payload conversion
//!
//! This module turns a job's `input` object into the payload sent to the
//! WebUI: LoRA entries are folded into the prompt, configured defaults fill
//! missing fields, and the generation endpoint is chosen. Every other field is
//! forwarded untouched.

use crate::core::constants::field;
use crate::models::webui::{InferenceEndpoint, LoraSpec};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Errors for job inputs that cannot be forwarded
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Job input must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("'prompt' must be a string when 'loras' are given")]
    InvalidPrompt,
}

/// Payload ready to be sent to the WebUI
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub endpoint: InferenceEndpoint,
    pub payload: Map<String, Value>,
}

/// Convert a job input into a WebUI request
///
/// # Arguments
///
/// * `input` - The job's `input` value
/// * `defaults` - Values inserted for keys the input leaves out
pub fn convert_job_input(
    input: Value,
    defaults: &Map<String, Value>,
) -> Result<PreparedRequest, PayloadError> {
    let mut payload = match input {
        Value::Object(map) => map,
        other => return Err(PayloadError::NotAnObject(json_type_name(&other))),
    };

    inject_loras(&mut payload)?;
    apply_defaults(&mut payload, defaults);
    let endpoint = select_endpoint(&payload);

    Ok(PreparedRequest { endpoint, payload })
}

/// Remove `loras` from the payload and append their tags to the prompt
///
/// Invalid entries are skipped. The prompt is left untouched when no entry is
/// valid.
pub fn inject_loras(payload: &mut Map<String, Value>) -> Result<(), PayloadError> {
    let loras = match payload.remove(field::LORAS) {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => return Ok(()),
        Some(other) => {
            warn!("Ignoring 'loras': expected a list, got {}", json_type_name(&other));
            return Ok(());
        }
    };

    let mut segment = String::new();
    for entry in &loras {
        match LoraSpec::from_value(entry) {
            Some(spec) => {
                segment.push(' ');
                segment.push_str(&spec.tag());
            }
            None => warn!("Invalid or incomplete LoRA entry skipped: {}", entry),
        }
    }

    if segment.is_empty() {
        return Ok(());
    }

    let prompt = match payload.get(field::PROMPT) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(_) => return Err(PayloadError::InvalidPrompt),
    };

    let prompt = prompt + &segment;
    debug!("Prompt modified with LoRAs. New prompt: \"{}\"", prompt);
    payload.insert(field::PROMPT.to_string(), Value::String(prompt));
    Ok(())
}

/// Insert each default whose key is absent
///
/// A key present with `null` counts as present.
pub fn apply_defaults(payload: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    for (key, value) in defaults {
        if !payload.contains_key(key) {
            payload.insert(key.clone(), value.clone());
        }
    }
}

/// `img2img` when `init_images` is present and non-empty, otherwise `txt2img`
pub fn select_endpoint(payload: &Map<String, Value>) -> InferenceEndpoint {
    match payload.get(field::INIT_IMAGES) {
        Some(value) if is_truthy(value) => InferenceEndpoint::Img2Img,
        _ => InferenceEndpoint::Txt2Img,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

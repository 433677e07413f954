//! WebUI API data models
//!
//! Generation payloads and responses are forwarded as raw JSON; only the
//! pieces the worker acts on are typed here.

use crate::core::constants::endpoint;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Generation endpoint a payload is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceEndpoint {
    Txt2Img,
    Img2Img,
}

impl InferenceEndpoint {
    /// Path relative to the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            InferenceEndpoint::Txt2Img => endpoint::TXT2IMG,
            InferenceEndpoint::Img2Img => endpoint::IMG2IMG,
        }
    }
}

impl fmt::Display for InferenceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A LoRA reference injected into the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSpec {
    /// File name in `models/Lora`, without extension
    pub name: String,
    pub weight: Number,
}

impl LoraSpec {
    /// Parse an entry of the `loras` list
    ///
    /// Returns `None` unless the entry is an object with a non-empty string
    /// `name` and a numeric `weight`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        let name = entry.get("name")?.as_str()?;
        if name.is_empty() {
            return None;
        }
        let weight = match entry.get("weight")? {
            Value::Number(n) => n.clone(),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            weight,
        })
    }

    /// Prompt tag understood by the WebUI, e.g. `<lora:detail:0.7>`
    pub fn tag(&self) -> String {
        format!("<lora:{}:{}>", self.name, self.weight)
    }
}

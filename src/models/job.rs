//! Job envelope models
//!
//! A job is an opaque `input` object plus an id assigned by the queue.

use crate::core::constants::field;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work taken from the job queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

/// Final result reported back to the job queue
///
/// Serializes as `{"output": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobResult {
    Output(Value),
    Error(String),
}

impl JobResult {
    /// Classify a handler output
    ///
    /// An object carrying an `error` key is a failed job; everything else is
    /// a successful output.
    pub fn from_output(output: Value) -> Self {
        match output.get(field::ERROR) {
            Some(Value::String(message)) => JobResult::Error(message.clone()),
            Some(Value::Null) | None => JobResult::Output(output),
            Some(other) => JobResult::Error(other.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobResult::Error(_))
    }
}

//! Job handler
//!
//! Prepares a job input, forwards it to the WebUI and converts the outcome
//! into the JSON returned to the caller. Every outcome, including failures,
//! is a JSON value.

use crate::conversion::request_converter::convert_job_input;
use crate::conversion::response_converter::{convert_payload_error, convert_webui_result};
use crate::core::client::WebUiClient;
use crate::core::constants::field;
use serde_json::{Map, Value};
use tracing::{error, info};

/// Forwards job inputs to the WebUI
#[derive(Debug, Clone)]
pub struct JobHandler {
    client: WebUiClient,
    defaults: Map<String, Value>,
}

impl JobHandler {
    pub fn new(client: WebUiClient, defaults: Map<String, Value>) -> Self {
        Self { client, defaults }
    }

    /// Handle one job input
    pub async fn handle(&self, input: Value) -> Value {
        let prepared = match convert_job_input(input, &self.defaults) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Rejected job input: {}", e);
                return convert_payload_error(&e);
            }
        };

        info!("Forwarding job to WebUI {} endpoint", prepared.endpoint);
        let output =
            convert_webui_result(self.client.run_inference(prepared.endpoint, &prepared.payload).await);

        if let Some(message) = output.get(field::ERROR).and_then(Value::as_str) {
            error!("{}", message);
        }
        output
    }
}

//! Startup sequence against the WebUI
//!
//! Waits for the API to answer and selects the configured checkpoint before
//! the worker starts taking jobs.

use crate::core::client::WebUiClient;
use crate::core::config::WebUiConfig;
use crate::core::constants::field;
use crate::core::launcher::WebUiProcess;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Delay between setting and verifying the checkpoint
const CHECKPOINT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Errors that stop the readiness wait
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("WebUI did not become ready within {0:?}")]
    Timeout(Duration),

    #[error("WebUI process exited during startup ({0})")]
    ProcessExited(String),

    #[error("Startup cancelled")]
    Cancelled,
}

/// Readiness polling settings
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub check_interval: Duration,
    /// Log every N failed probes
    pub log_interval: u32,
    pub timeout: Option<Duration>,
}

impl From<&WebUiConfig> for ReadinessConfig {
    fn from(config: &WebUiConfig) -> Self {
        Self {
            check_interval: Duration::from_millis(config.ready_check_interval_ms),
            log_interval: config.ready_log_interval.max(1),
            timeout: (config.ready_timeout_secs > 0)
                .then(|| Duration::from_secs(config.ready_timeout_secs)),
        }
    }
}

/// Poll the WebUI until it answers
///
/// Returns the number of failed probes before success.
pub async fn wait_for_service(
    client: &WebUiClient,
    config: &ReadinessConfig,
    mut process: Option<&mut WebUiProcess>,
    cancel: &CancellationToken,
) -> Result<u32, ReadinessError> {
    let started = Instant::now();
    let mut failures = 0u32;

    info!("Waiting for WebUI API at {} to be ready...", client.base_url());

    loop {
        let probe = tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            result = client.check_ready() => result,
        };

        match probe {
            Ok(()) => {
                info!("WebUI API is ready after {:.1}s", started.elapsed().as_secs_f64());
                return Ok(failures);
            }
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % config.log_interval == 0 {
                    info!(
                        "WebUI API not ready yet (attempt {}). Retrying... Error: {}",
                        failures, e
                    );
                }
            }
        }

        if let Some(process) = process.as_deref_mut() {
            if let Ok(Some(status)) = process.try_exit_status() {
                return Err(ReadinessError::ProcessExited(status.to_string()));
            }
        }

        if let Some(timeout) = config.timeout {
            if started.elapsed() >= timeout {
                return Err(ReadinessError::Timeout(timeout));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            _ = tokio::time::sleep(config.check_interval) => {}
        }
    }
}

/// Select the active checkpoint
///
/// Failures are logged and never abort startup. Returns whether the WebUI
/// reports the requested checkpoint afterwards.
pub async fn set_model_checkpoint(client: &WebUiClient, checkpoint: &str) -> bool {
    info!("Attempting to set SD model checkpoint to: {}", checkpoint);

    let mut options = Map::new();
    options.insert(
        field::SD_MODEL_CHECKPOINT.to_string(),
        Value::String(checkpoint.to_string()),
    );

    if let Err(e) = client.set_options(&options).await {
        warn!("Error setting SD model checkpoint to '{}': {}", checkpoint, e);
        return false;
    }

    tokio::time::sleep(CHECKPOINT_SETTLE_DELAY).await;

    let current = match client.get_options().await {
        Ok(options) => options,
        Err(e) => {
            warn!("Could not verify SD model checkpoint '{}': {}", checkpoint, e);
            return false;
        }
    };

    // the reported title may carry a hash suffix, e.g. "model.safetensors [6ce0161689]"
    match current.get(field::SD_MODEL_CHECKPOINT).and_then(Value::as_str) {
        Some(reported) if reported.contains(checkpoint) => {
            info!("SD model checkpoint set. API reports: {}", reported);
            true
        }
        reported => {
            warn!(
                "SD model checkpoint may not have been set. Requested: {}, API reports: {}. \
                 Ensure the file is present in 'models/Stable-diffusion'.",
                checkpoint,
                reported.unwrap_or("<none>")
            );
            false
        }
    }
}

//! Worker configuration management
//!
//! This module handles loading and validating configuration from a TOML file
//! with environment variable overrides. All values are validated at startup so
//! the worker fails fast if misconfigured.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default WebUI API base URL
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/sdapi/v1";

/// Default checkpoint selected at startup
const DEFAULT_CHECKPOINT: &str = "Gemini_ILMixV5.safetensors";

/// Default delay between readiness probes in milliseconds
const DEFAULT_READY_CHECK_INTERVAL_MS: u64 = 500;

/// Default number of failed probes between readiness log lines
const DEFAULT_READY_LOG_INTERVAL: u32 = 15;

/// Default readiness probe timeout in seconds
const DEFAULT_HEALTH_TIMEOUT: u64 = 10;

/// Default timeout for setting options in seconds
const DEFAULT_OPTIONS_POST_TIMEOUT: u64 = 60;

/// Default timeout for reading options in seconds
const DEFAULT_OPTIONS_GET_TIMEOUT: u64 = 30;

/// Default inference timeout in seconds
const DEFAULT_INFERENCE_TIMEOUT: u64 = 600;

/// Default maximum retries
const DEFAULT_MAX_RETRIES: u32 = 15;

/// Default backoff factor in seconds
const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

/// Default backoff ceiling in seconds
const DEFAULT_MAX_BACKOFF: u64 = 120;

/// Default job queue poll interval in milliseconds
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default local API port
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LaunchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebUiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Empty disables checkpoint selection
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
    #[serde(default = "default_ready_check_interval_ms")]
    pub ready_check_interval_ms: u64,
    #[serde(default = "default_ready_log_interval")]
    pub ready_log_interval: u32,
    /// Zero waits forever
    #[serde(default)]
    pub ready_timeout_secs: u64,
    #[serde(default)]
    pub launch: LaunchConfig,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            checkpoint: default_checkpoint(),
            ready_check_interval_ms: DEFAULT_READY_CHECK_INTERVAL_MS,
            ready_log_interval: DEFAULT_READY_LOG_INTERVAL,
            ready_timeout_secs: 0,
            launch: LaunchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_health_timeout")]
    pub health_timeout: u64,
    #[serde(default = "default_options_post_timeout")]
    pub options_post_timeout: u64,
    #[serde(default = "default_options_get_timeout")]
    pub options_get_timeout: u64,
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: u64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            options_post_timeout: DEFAULT_OPTIONS_POST_TIMEOUT,
            options_get_timeout: DEFAULT_OPTIONS_GET_TIMEOUT,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_backoff: DEFAULT_MAX_BACKOFF,
            retry_statuses: default_retry_statuses(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub job_get_url: Option<String>,
    #[serde(default)]
    pub job_done_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_get_url: None,
            job_done_url: None,
            api_key: None,
            worker_id: default_worker_id(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            log_level: default_log_level(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_checkpoint() -> String {
    DEFAULT_CHECKPOINT.to_string()
}

fn default_ready_check_interval_ms() -> u64 {
    DEFAULT_READY_CHECK_INTERVAL_MS
}

fn default_ready_log_interval() -> u32 {
    DEFAULT_READY_LOG_INTERVAL
}

fn default_health_timeout() -> u64 {
    DEFAULT_HEALTH_TIMEOUT
}

fn default_options_post_timeout() -> u64 {
    DEFAULT_OPTIONS_POST_TIMEOUT
}

fn default_options_get_timeout() -> u64 {
    DEFAULT_OPTIONS_GET_TIMEOUT
}

fn default_inference_timeout() -> u64 {
    DEFAULT_INFERENCE_TIMEOUT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF
}

fn default_retry_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_worker_id() -> String {
    "local-worker".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Payload values applied when a job leaves them out
pub fn default_payload_defaults() -> Map<String, Value> {
    let defaults = json!({
        "steps": 20,
        "sampler_name": "Euler a",
        "cfg_scale": 7.0,
        "width": 512,
        "height": 512,
        "seed": -1,
        "negative_prompt": "",
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Merge a configured `[defaults]` table over the built-in defaults
fn deserialize_payload_defaults<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let configured = Map::<String, Value>::deserialize(deserializer)?;
    let mut defaults = default_payload_defaults();
    defaults.extend(configured);
    Ok(defaults)
}

/// Worker configuration loaded from TOML and the environment
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub webui: WebUiConfig,
    #[serde(default)]
    pub request: RequestConfig,
    /// Payload defaults, inserted only for absent keys
    #[serde(
        default = "default_payload_defaults",
        deserialize_with = "deserialize_payload_defaults"
    )]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webui: WebUiConfig::default(),
            request: RequestConfig::default(),
            defaults: default_payload_defaults(),
            queue: QueueConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text without environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML for this schema or if any
    /// value fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The TOML file cannot be read or parsed
    /// - Configuration values are invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read configuration file")?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from `CONFIG_PATH` (default `config.toml`) and
    /// apply environment overrides
    ///
    /// A missing file is not an error; every value has a default.
    pub fn from_env() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
                .with_context(|| format!("Invalid configuration in {}", config_path))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override values from a key lookup (the process environment in
    /// production). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("WEBUI_BASE_URL") {
            self.webui.base_url = url;
        }
        // an empty checkpoint disables selection, so it is not filtered
        if let Some(checkpoint) = lookup("SD_MODEL_CHECKPOINT") {
            self.webui.checkpoint = checkpoint.trim().to_string();
        }
        if let Some(url) = get("RUNPOD_WEBHOOK_GET_JOB") {
            self.queue.job_get_url = Some(url);
        }
        if let Some(url) = get("RUNPOD_WEBHOOK_POST_OUTPUT") {
            self.queue.job_done_url = Some(url);
        }
        if let Some(key) = get("RUNPOD_AI_API_KEY") {
            self.queue.api_key = Some(key);
        }
        if let Some(id) = get("RUNPOD_POD_ID") {
            self.queue.worker_id = id;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.server.log_level = level;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let base = &self.webui.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("webui.base_url must be an http(s) URL, got '{}'", base);
        }
        if !self.request.backoff_factor.is_finite() || self.request.backoff_factor < 0.0 {
            bail!("request.backoff_factor must be a non-negative number");
        }
        if self.webui.ready_check_interval_ms == 0 {
            bail!("webui.ready_check_interval_ms must be greater than zero");
        }
        if self.queue.poll_interval_ms == 0 {
            bail!("queue.poll_interval_ms must be greater than zero");
        }
        if self.webui.launch.enabled && self.webui.launch.command.trim().is_empty() {
            bail!("webui.launch.command is required when webui.launch.enabled is true");
        }
        Ok(())
    }

    /// Whether both job queue endpoints are configured
    pub fn queue_configured(&self) -> bool {
        self.queue.job_get_url.is_some() && self.queue.job_done_url.is_some()
    }
}

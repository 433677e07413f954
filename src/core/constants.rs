//! Constants for WebUI endpoints, payload keys and job states
//!
//! This module defines string constants used throughout the application for
//! API paths, well-known payload fields and the status values reported back
//! to callers.

/// WebUI API paths, relative to the configured `/sdapi/v1` base URL
pub mod endpoint {
    /// Text-to-image generation
    pub const TXT2IMG: &str = "txt2img";

    /// Image-to-image generation
    pub const IMG2IMG: &str = "img2img";

    /// Global options (checkpoint selection lives here)
    pub const OPTIONS: &str = "options";

    /// Lightweight progress probe used as readiness check
    pub const PROGRESS: &str = "progress?skip_current_image=true";
}

/// Payload field names
pub mod field {
    /// Positive prompt
    pub const PROMPT: &str = "prompt";

    /// LoRA list consumed by the worker, never forwarded
    pub const LORAS: &str = "loras";

    /// Source images; non-empty selects img2img
    pub const INIT_IMAGES: &str = "init_images";

    /// Option key holding the active checkpoint
    pub const SD_MODEL_CHECKPOINT: &str = "sd_model_checkpoint";

    /// Error message in a job output
    pub const ERROR: &str = "error";

    /// HTTP-like status attached to a failed job output
    pub const STATUS_CODE: &str = "status_code";
}

/// Job status values reported by the local test API
pub mod status {
    /// Handler produced an output
    pub const COMPLETED: &str = "COMPLETED";

    /// Handler produced an error
    pub const FAILED: &str = "FAILED";
}

/// Placeholder substituted into job queue URLs
pub const ID_PLACEHOLDER: &str = "$ID";

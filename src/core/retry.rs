//! Retry policy for calls to the WebUI API
//!
//! Connection failures are retried for every method. Retryable status codes
//! only trigger a retry for idempotent methods, so a generation request that
//! reaches the server is never submitted twice.

use crate::core::config::RequestConfig;
use reqwest::Method;
use std::time::Duration;

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in seconds, doubled on each retry
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    pub max_backoff: Duration,
    /// Status codes that trigger a retry for idempotent requests
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RequestConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            max_backoff: Duration::from_secs(config.max_backoff),
            retry_statuses: config.retry_statuses.clone(),
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: 0.0,
            max_backoff: Duration::ZERO,
            retry_statuses: Vec::new(),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        if self.backoff_factor <= 0.0 || retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(31) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }

    /// Whether a response status should be retried for this method
    pub fn should_retry_status(&self, method: &Method, status: u16) -> bool {
        is_idempotent(method) && self.retry_statuses.contains(&status)
    }

    /// Whether a transport error should be retried
    ///
    /// Connect failures never reached the server and are always repeated.
    /// Timeouts are only repeated for idempotent methods.
    pub fn should_retry_error(&self, method: &Method, error: &reqwest::Error) -> bool {
        error.is_connect() || (is_idempotent(method) && error.is_timeout())
    }
}

fn is_idempotent(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .contains(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs_f64(0.3));
        assert_eq!(policy.backoff(2), Duration::from_secs_f64(0.6));
        assert_eq!(policy.backoff(3), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(15), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_factor_never_sleeps() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.backoff(4), Duration::ZERO);
    }

    #[test]
    fn test_status_retry_only_for_get() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry_status(&Method::GET, 503));
        assert!(!policy.should_retry_status(&Method::GET, 404));
        assert!(!policy.should_retry_status(&Method::POST, 503));
    }
}

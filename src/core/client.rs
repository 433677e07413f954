//! Async client for the AUTOMATIC1111 WebUI API
//!
//! This module provides the HTTP client used for readiness probes, option
//! updates and generation requests. Every call goes through the configured
//! [`RetryPolicy`].

use crate::core::config::RequestConfig;
use crate::core::constants::endpoint;
use crate::core::retry::RetryPolicy;
use crate::models::webui::InferenceEndpoint;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Error types that can occur during WebUI API interactions
#[derive(Debug, thiserror::Error)]
pub enum WebUiError {
    #[error("HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// WebUI API client with retry support
#[derive(Debug, Clone)]
pub struct WebUiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    health_timeout: Duration,
    options_post_timeout: Duration,
    options_get_timeout: Duration,
    inference_timeout: Duration,
}

impl WebUiClient {
    /// Create a new WebUI client
    ///
    /// # Arguments
    ///
    /// * `base_url` - API base URL, e.g. `http://127.0.0.1:3000/sdapi/v1`
    /// * `request` - Timeouts and retry settings
    pub fn new(base_url: &str, request: &RequestConfig) -> Result<Self, WebUiError> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(request),
            health_timeout: Duration::from_secs(request.health_timeout),
            options_post_timeout: Duration::from_secs(request.options_post_timeout),
            options_get_timeout: Duration::from_secs(request.options_get_timeout),
            inference_timeout: Duration::from_secs(request.inference_timeout),
        })
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Probe the progress endpoint; succeeds once the API answers 2xx
    pub async fn check_ready(&self) -> Result<(), WebUiError> {
        let url = self.url(endpoint::PROGRESS);
        let response = self
            .send(Method::GET, || {
                self.client.get(&url).timeout(self.health_timeout)
            })
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Fetch the current global options
    pub async fn get_options(&self) -> Result<Map<String, Value>, WebUiError> {
        let url = self.url(endpoint::OPTIONS);
        let response = self
            .send(Method::GET, || {
                self.client.get(&url).timeout(self.options_get_timeout)
            })
            .await?;
        let response = Self::ensure_success(response).await?;

        match Self::decode(response).await? {
            Value::Object(map) => Ok(map),
            other => Err(WebUiError::Decode(format!(
                "expected options object, got {}",
                other
            ))),
        }
    }

    /// Update global options
    pub async fn set_options(&self, options: &Map<String, Value>) -> Result<(), WebUiError> {
        let url = self.url(endpoint::OPTIONS);
        let response = self
            .send(Method::POST, || {
                self.client
                    .post(&url)
                    .timeout(self.options_post_timeout)
                    .json(options)
            })
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Run a generation request and return the raw JSON response
    pub async fn run_inference(
        &self,
        endpoint: InferenceEndpoint,
        payload: &Map<String, Value>,
    ) -> Result<Value, WebUiError> {
        let url = self.url(endpoint.path());
        debug!("Sending request to WebUI API: {}", url);

        let response = self
            .send(Method::POST, || {
                self.client
                    .post(&url)
                    .timeout(self.inference_timeout)
                    .json(payload)
            })
            .await?;
        let response = Self::ensure_success(response).await?;
        Self::decode(response).await
    }

    /// Send a request, retrying according to the policy
    ///
    /// The builder closure is invoked once per attempt.
    async fn send<F>(&self, method: Method, build: F) -> Result<Response, WebUiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0u32;
        loop {
            match build().send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if retry < self.retry.max_retries
                        && self.retry.should_retry_status(&method, status)
                    {
                        retry += 1;
                        warn!(
                            "WebUI returned status {} for {} {}, retry {}/{}",
                            status,
                            method,
                            response.url(),
                            retry,
                            self.retry.max_retries
                        );
                        tokio::time::sleep(self.retry.backoff(retry)).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if retry < self.retry.max_retries && self.retry.should_retry_error(&method, &e)
                    {
                        retry += 1;
                        debug!(
                            "WebUI request failed ({}), retry {}/{}",
                            e, retry, self.retry.max_retries
                        );
                        tokio::time::sleep(self.retry.backoff(retry)).await;
                        continue;
                    }
                    return Err(WebUiError::Request(e));
                }
            }
        }
    }

    async fn ensure_success(response: Response) -> Result<Response, WebUiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(WebUiError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode(response: Response) -> Result<Value, WebUiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| WebUiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/sdapi/v1", addr)
    }

    fn fast_config() -> RequestConfig {
        RequestConfig {
            max_retries: 3,
            backoff_factor: 0.0,
            ..RequestConfig::default()
        }
    }

    #[tokio::test]
    async fn test_get_retries_on_503() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/sdapi/v1/progress",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "loading")
                    } else {
                        (StatusCode::OK, "{}")
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;

        let client = WebUiClient::new(&base, &fast_config()).unwrap();
        client.check_ready().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_post_is_not_retried_on_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/sdapi/v1/txt2img",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, "CUDA out of memory")
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;

        let client = WebUiClient::new(&base, &fast_config()).unwrap();
        let err = client
            .run_inference(InferenceEndpoint::Txt2Img, &Map::new())
            .await
            .unwrap_err();

        match err {
            WebUiError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "CUDA out of memory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_inference_forwards_payload() {
        let app = Router::new().route(
            "/sdapi/v1/img2img",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "images": ["aGVsbG8="], "parameters": body, "info": "{}" }))
            }),
        );
        let base = serve(app).await;

        let client = WebUiClient::new(&base, &fast_config()).unwrap();
        let mut payload = Map::new();
        payload.insert("prompt".into(), json!("a red fox"));
        payload.insert("init_images".into(), json!(["abc"]));

        let response = client
            .run_inference(InferenceEndpoint::Img2Img, &payload)
            .await
            .unwrap();
        assert_eq!(response["parameters"]["prompt"], "a red fox");
        assert_eq!(response["images"][0], "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_options_roundtrip() {
        let app = Router::new().route(
            "/sdapi/v1/options",
            get(|| async { Json(json!({ "sd_model_checkpoint": "model.safetensors [abc123]" })) })
                .post(|| async { Json(Value::Null) }),
        );
        let base = serve(app).await;

        let client = WebUiClient::new(&base, &fast_config()).unwrap();
        let mut options = Map::new();
        options.insert("sd_model_checkpoint".into(), json!("model.safetensors"));
        client.set_options(&options).await.unwrap();

        let current = client.get_options().await.unwrap();
        assert_eq!(current["sd_model_checkpoint"], "model.safetensors [abc123]");
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WebUiClient::new(&format!("http://{}/sdapi/v1", addr), &fast_config())
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        let err = client.check_ready().await.unwrap_err();
        assert!(matches!(err, WebUiError::Request(_)));
    }
}

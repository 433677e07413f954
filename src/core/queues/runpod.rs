//! HTTP job queue used by RunPod serverless workers
//!
//! Jobs are taken with `GET <job_get_url>` and results are posted to
//! `<job_done_url>`. Both URLs may contain a `$ID` placeholder, replaced by
//! the worker id and the job id respectively.

use crate::core::config::QueueConfig;
use crate::core::constants::ID_PLACEHOLDER;
use crate::core::queue::{JobQueue, QueueError};
use crate::models::job::{Job, JobResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Timeout for job queue calls
const QUEUE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP job queue client
pub struct RunpodQueue {
    client: Client,
    job_get_url: String,
    job_done_url: String,
    api_key: Option<String>,
    worker_id: String,
}

impl RunpodQueue {
    /// Create a queue client
    ///
    /// # Arguments
    ///
    /// * `job_get_url` - Job take URL, `$ID` is replaced by `worker_id`
    /// * `job_done_url` - Result URL, `$ID` is replaced by the job id
    /// * `api_key` - Sent verbatim in the `Authorization` header when set
    /// * `worker_id` - Identifier of this worker
    pub fn new(
        job_get_url: String,
        job_done_url: String,
        api_key: Option<String>,
        worker_id: String,
    ) -> Result<Self, QueueError> {
        let client = Client::builder().timeout(QUEUE_TIMEOUT).build()?;

        Ok(Self {
            client,
            job_get_url,
            job_done_url,
            api_key,
            worker_id,
        })
    }

    /// Build from configuration; `None` unless both URLs are set
    pub fn from_config(config: &QueueConfig) -> Option<Result<Self, QueueError>> {
        let get_url = config.job_get_url.clone()?;
        let done_url = config.job_done_url.clone()?;
        Some(Self::new(
            get_url,
            done_url,
            config.api_key.clone(),
            config.worker_id.clone(),
        ))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(reqwest::header::AUTHORIZATION, key),
            None => builder,
        }
    }

    async fn api_error(response: reqwest::Response) -> QueueError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        QueueError::Api { status, message }
    }
}

#[async_trait]
impl JobQueue for RunpodQueue {
    async fn next_job(&self) -> Result<Option<Job>, QueueError> {
        let url = self.job_get_url.replace(ID_PLACEHOLDER, &self.worker_id);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("job_in_progress", "0")])
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| QueueError::InvalidJob(e.to_string()))?;
        if value.is_null() {
            return Ok(None);
        }

        let job: Job =
            serde_json::from_value(value).map_err(|e| QueueError::InvalidJob(e.to_string()))?;
        debug!("Received job {}", job.id);
        Ok(Some(job))
    }

    async fn submit(&self, job_id: &str, result: &JobResult) -> Result<(), QueueError> {
        let url = self.job_done_url.replace(ID_PLACEHOLDER, job_id);
        let response = self
            .authorize(self.client.post(&url))
            .query(&[("isStream", "false")])
            .json(result)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    fn queue_name(&self) -> &str {
        "RunPod"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::{get, post},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeQueue {
        pending: Arc<Mutex<Vec<Value>>>,
        done: Arc<Mutex<Vec<(String, Value)>>>,
        seen_auth: Arc<Mutex<Option<String>>>,
    }

    async fn take(
        State(queue): State<FakeQueue>,
        Path(worker): Path<String>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        assert_eq!(worker, "pod-7");
        assert_eq!(params.get("job_in_progress").map(String::as_str), Some("0"));
        *queue.seen_auth.lock().await = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match queue.pending.lock().await.pop() {
            Some(job) => Json(job).into_response(),
            None => AxumStatus::NO_CONTENT.into_response(),
        }
    }

    async fn done(
        State(queue): State<FakeQueue>,
        Path(job_id): Path<String>,
        Json(body): Json<Value>,
    ) -> AxumStatus {
        queue.done.lock().await.push((job_id, body));
        AxumStatus::OK
    }

    async fn serve(queue: FakeQueue) -> String {
        let app = Router::new()
            .route("/job-take/{worker}", get(take))
            .route("/job-done/{job_id}", post(done))
            .with_state(queue);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn queue_for(base: &str) -> RunpodQueue {
        RunpodQueue::new(
            format!("{}/job-take/$ID", base),
            format!("{}/job-done/$ID", base),
            Some("rp-secret".to_string()),
            "pod-7".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_takes_job_and_sends_auth() {
        let fake = FakeQueue::default();
        fake.pending
            .lock()
            .await
            .push(json!({"id": "job-42", "input": {"prompt": "a castle"}}));
        let base = serve(fake.clone()).await;

        let queue = queue_for(&base);
        let job = queue.next_job().await.unwrap().unwrap();
        assert_eq!(job.id, "job-42");
        assert_eq!(job.input["prompt"], "a castle");
        assert_eq!(fake.seen_auth.lock().await.as_deref(), Some("rp-secret"));
    }

    #[tokio::test]
    async fn test_no_content_means_no_job() {
        let base = serve(FakeQueue::default()).await;
        assert!(queue_for(&base).next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_posts_result_to_job_url() {
        let fake = FakeQueue::default();
        let base = serve(fake.clone()).await;

        queue_for(&base)
            .submit("job-42", &JobResult::Error("boom".to_string()))
            .await
            .unwrap();

        let done = fake.done.lock().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, "job-42");
        assert_eq!(done[0].1, json!({"error": "boom"}));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let app = Router::new().route(
            "/job-take/{worker}",
            get(|| async { (AxumStatus::UNAUTHORIZED, "bad key") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = queue_for(&format!("http://{}", addr))
            .next_job()
            .await
            .unwrap_err();
        match err {
            QueueError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Job loop
//!
//! Takes one job at a time from a [`JobQueue`], runs it through the
//! [`JobHandler`] and reports the result.

use crate::core::handler::JobHandler;
use crate::core::queue::JobQueue;
use crate::models::job::JobResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on the delay after repeated queue errors
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Counters reported when the loop stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

/// Delay after `consecutive_errors` queue failures in a row
pub fn error_backoff(poll_interval: Duration, consecutive_errors: u32) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_errors.min(16));
    poll_interval.saturating_mul(factor).min(MAX_ERROR_BACKOFF)
}

/// Run jobs until cancelled or the queue is exhausted
pub async fn run_worker(
    queue: &dyn JobQueue,
    handler: &JobHandler,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut consecutive_errors = 0u32;

    info!("Worker started, taking jobs from {}", queue.queue_name());

    while !cancel.is_cancelled() {
        if queue.is_exhausted() {
            break;
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.next_job() => next,
        };

        let job = match next {
            Ok(Some(job)) => {
                consecutive_errors = 0;
                job
            }
            Ok(None) => {
                consecutive_errors = 0;
                if queue.is_exhausted() {
                    break;
                }
                sleep_or_cancel(poll_interval, cancel).await;
                continue;
            }
            Err(e) => {
                consecutive_errors += 1;
                let delay = error_backoff(poll_interval, consecutive_errors);
                warn!("Failed to take job: {} (retrying in {:?})", e, delay);
                sleep_or_cancel(delay, cancel).await;
                continue;
            }
        };

        info!("Started job {}", job.id);
        let output = handler.handle(job.input).await;
        let result = JobResult::from_output(output);

        if result.is_error() {
            stats.failed += 1;
        } else {
            stats.completed += 1;
        }

        match queue.submit(&job.id, &result).await {
            Ok(()) => info!("Finished job {} (failed: {})", job.id, result.is_error()),
            Err(e) => error!("Failed to report result for job {}: {}", job.id, e),
        }
    }

    info!(
        "Worker stopped: {} completed, {} failed",
        stats.completed, stats.failed
    );
    stats
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::WebUiClient;
    use crate::core::config::RequestConfig;
    use crate::core::queue::QueueError;
    use crate::core::queues::TestInputQueue;
    use crate::core::retry::RetryPolicy;
    use crate::models::job::Job;
    use async_trait::async_trait;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/sdapi/v1", addr)
    }

    fn handler(base: &str) -> JobHandler {
        let client = WebUiClient::new(base, &RequestConfig::default())
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        JobHandler::new(client, Map::new())
    }

    /// Queue that fails a fixed number of times, then serves its jobs
    struct FlakyQueue {
        failures_left: AtomicU32,
        jobs: Mutex<Vec<Job>>,
        results: Mutex<Vec<(String, JobResult)>>,
    }

    #[async_trait]
    impl JobQueue for FlakyQueue {
        async fn next_job(&self) -> Result<Option<Job>, QueueError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(QueueError::InvalidJob("flaky".to_string()));
            }
            Ok(self.jobs.lock().await.pop())
        }

        async fn submit(&self, job_id: &str, result: &JobResult) -> Result<(), QueueError> {
            self.results
                .lock()
                .await
                .push((job_id.to_string(), result.clone()));
            Ok(())
        }

        fn queue_name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn test_error_backoff_grows_and_caps() {
        let poll = Duration::from_millis(500);
        assert_eq!(error_backoff(poll, 1), Duration::from_secs(1));
        assert_eq!(error_backoff(poll, 2), Duration::from_secs(2));
        assert_eq!(error_backoff(poll, 20), MAX_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_runs_single_test_job() {
        let app = Router::new().route(
            "/sdapi/v1/txt2img",
            post(|| async { Json(json!({"images": ["aGk="], "info": "{}"})) }),
        );
        let base = serve(app).await;

        let queue = TestInputQueue::new(json!({"prompt": "a mountain"}));
        let stats = run_worker(
            &queue,
            &handler(&base),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(stats, WorkerStats { completed: 1, failed: 0 });
        assert_eq!(
            queue.result().await,
            Some(JobResult::Output(json!({"images": ["aGk="], "info": "{}"})))
        );
    }

    #[tokio::test]
    async fn test_failed_job_reported_as_error() {
        let app = Router::new().route(
            "/sdapi/v1/txt2img",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let base = serve(app).await;

        let queue = TestInputQueue::new(json!({"prompt": "x"}));
        let stats = run_worker(
            &queue,
            &handler(&base),
            Duration::from_millis(10),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(stats.failed, 1);
        match queue.result().await {
            Some(JobResult::Error(message)) => assert!(message.contains("model not loaded")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recovers_from_queue_errors_until_cancelled() {
        let app = Router::new().route(
            "/sdapi/v1/txt2img",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        );
        let base = serve(app).await;

        let queue = FlakyQueue {
            failures_left: AtomicU32::new(2),
            jobs: Mutex::new(vec![Job {
                id: "job-1".to_string(),
                input: json!({"prompt": "dunes"}),
            }]),
            results: Mutex::new(Vec::new()),
        };
        let handler = handler(&base);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let stats = run_worker(&queue, &handler, Duration::from_millis(10), &cancel).await;

        assert_eq!(stats.completed, 1);
        let results = queue.results.lock().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "job-1");
    }
}

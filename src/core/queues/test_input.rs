//! Single-job queue fed from `--test-input`
//!
//! Accepts either a path to a JSON file or a JSON literal of the form
//! `{"input": {...}}`. Yields exactly one job and keeps its result.

use crate::core::queue::{JobQueue, QueueError};
use crate::models::job::{Job, JobResult};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// Id given to the test job
const TEST_JOB_ID: &str = "local_test";

pub struct TestInputQueue {
    job: Mutex<Option<Job>>,
    taken: AtomicBool,
    result: Mutex<Option<JobResult>>,
}

impl TestInputQueue {
    pub fn new(input: Value) -> Self {
        Self {
            job: Mutex::new(Some(Job {
                id: TEST_JOB_ID.to_string(),
                input,
            })),
            taken: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    /// Parse the `--test-input` argument
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, the text is not JSON, or the
    /// document has no `input` field.
    pub fn from_arg(arg: &str) -> Result<Self> {
        let text = if Path::new(arg).is_file() {
            std::fs::read_to_string(arg)
                .with_context(|| format!("Failed to read test input file {}", arg))?
        } else {
            arg.to_string()
        };

        let mut document: Value =
            serde_json::from_str(&text).context("Test input is not valid JSON")?;
        let input = document
            .get_mut("input")
            .map(Value::take)
            .ok_or_else(|| anyhow!("Test input must be an object with an 'input' field"))?;

        Ok(Self::new(input))
    }

    /// Result reported for the test job, once handled
    pub async fn result(&self) -> Option<JobResult> {
        self.result.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for TestInputQueue {
    async fn next_job(&self) -> Result<Option<Job>, QueueError> {
        let job = self.job.lock().await.take();
        if job.is_some() {
            self.taken.store(true, Ordering::SeqCst);
        }
        Ok(job)
    }

    async fn submit(&self, job_id: &str, result: &JobResult) -> Result<(), QueueError> {
        info!("Test job {} finished (failed: {})", job_id, result.is_error());
        *self.result.lock().await = Some(result.clone());
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.taken.load(Ordering::SeqCst)
    }

    fn queue_name(&self) -> &str {
        "test input"
    }
}

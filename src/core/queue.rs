//! Job queue abstraction
//!
//! This module defines a common trait for the sources the worker takes jobs
//! from (a remote HTTP job queue, or a single test input) and reports
//! results to.

use crate::models::job::{Job, JobResult};
use async_trait::async_trait;
use thiserror::Error;

/// Error types for job queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Job queue error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid job received: {0}")]
    InvalidJob(String),
}

/// Trait for job sources
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Take the next job
    ///
    /// `Ok(None)` means no work is available right now.
    async fn next_job(&self) -> Result<Option<Job>, QueueError>;

    /// Report the result of a job
    async fn submit(&self, job_id: &str, result: &JobResult) -> Result<(), QueueError>;

    /// Whether the queue can never yield another job
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Get the queue name
    fn queue_name(&self) -> &str;
}

//! Local HTTP API for running jobs without a job queue

pub mod endpoints;

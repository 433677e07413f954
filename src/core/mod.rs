//! Core worker modules
//!
//! This module contains configuration, constants, logging, the WebUI client,
//! process bootstrapping, job queues and the job loop.

pub mod client;
pub mod config;
pub mod constants;
pub mod handler;
pub mod launcher;
pub mod logging;
pub mod queue;
pub mod queues;
pub mod readiness;
pub mod retry;
pub mod worker;

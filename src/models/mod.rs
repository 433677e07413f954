//! Data models
//!
//! This module contains the job envelope exchanged with the job queue and the
//! small set of WebUI types the worker interprets itself.

pub mod job;
pub mod webui;

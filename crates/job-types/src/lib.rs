//! Core types and traits for job status synchronization.
//!
//! `JobStatus` matches the JSON shape served by `GET /job/{jobId}` and pushed on
//! `/topic/job/{jobId}`.

mod dto;
mod traits;

pub use dto::*;
pub use traits::*;

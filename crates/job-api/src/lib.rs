//! HTTP relay over the job status synchronizer.

pub mod server;

//! Client for the job status endpoint (`GET {base}/job/{jobId}`).

mod http;
#[cfg(feature = "test-util")]
pub mod mock;

pub use http::HttpStatusFetcher;
pub use job_types::{FetchError, StatusFetcher};

#[cfg(feature = "test-util")]
pub use mock::MockStatusFetcher;

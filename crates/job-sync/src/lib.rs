//! Job status synchronization.
//!
//! [`StatusReader`] performs one-shot fetches, [`Poller`] repeats them with backoff,
//! and [`JobSynchronizer`] merges polling with a push channel into one shared,
//! deduplicated stream per job.

mod alert;
mod cache;
mod coordinator;
mod dedup;
mod fetcher;
mod poller;
mod retry;

pub use alert::{Alert, RecordingAlertSink, TracingAlertSink};
pub use cache::StatusCache;
pub use coordinator::{
    JobSubscription, JobSynchronizer, SyncConfig, POLLING_INTERVAL, WEBSOCKET_FALLBACK_THRESHOLD,
};
pub use dedup::DedupFilter;
pub use fetcher::StatusReader;
pub use poller::{Poller, POLL_FAILED_MESSAGE};
pub use retry::{retry_with_backoff, RetryPolicy, MAX_RETRIES};

use job_types::FetchError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("job status fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("gave up after {retries} retries: {last}")]
    RetriesExhausted { retries: u32, last: FetchError },
    #[error("job pipeline closed before a status was available")]
    Closed,
}

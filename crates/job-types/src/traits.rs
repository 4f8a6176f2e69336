//! Traits for the collaborators the synchronizer talks to: status endpoint, push channel, alerts.

use crate::JobStatus;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Request/response access to a job's current status (`GET /job/{jobId}`).
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    /// Fetch the status as reported by the backend right now.
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, FetchError>;
}

/// Topic-based push notifications.
///
/// Dropping the receiver returned by `subscribe` ends the subscription.
pub trait PushChannel: Send + Sync {
    /// Whether the underlying connection is currently open.
    fn is_connected(&self) -> bool;

    /// Subscribe to status payloads published on `topic`.
    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<JobStatus>;
}

/// User-facing notification sink. Must not block and must not fail.
pub trait AlertSink: Send + Sync {
    fn show_error(&self, title: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("job id must not be empty")]
    EmptyJobId,
    /// 4xx from the status endpoint.
    #[error("job {job_id} not found or access denied (HTTP {status})")]
    Rejected { job_id: String, status: u16 },
    /// 5xx from the status endpoint.
    #[error("status endpoint error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid status payload: {0}")]
    Decode(String),
}

impl FetchError {
    /// Server and transport failures are worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Server { .. } | FetchError::Transport(_))
    }

    /// Classify an HTTP error status: 4xx is rejected, anything else is a server error.
    pub fn from_status(job_id: &str, status: u16, body: String) -> Self {
        if (400..500).contains(&status) {
            FetchError::Rejected {
                job_id: job_id.to_string(),
                status,
            }
        } else {
            FetchError::Server { status, body }
        }
    }
}

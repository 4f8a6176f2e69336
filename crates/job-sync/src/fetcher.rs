//! One-shot status reads with user alerts for jobs that cannot be read.

use job_types::{AlertSink, FetchError, JobStatus, StatusFetcher};
use std::sync::Arc;

/// Wraps a [`StatusFetcher`]; raises an alert when the job is missing or forbidden.
#[derive(Clone)]
pub struct StatusReader {
    fetcher: Arc<dyn StatusFetcher + Send + Sync>,
    alerts: Arc<dyn AlertSink + Send + Sync>,
}

impl StatusReader {
    pub fn new(
        fetcher: Arc<dyn StatusFetcher + Send + Sync>,
        alerts: Arc<dyn AlertSink + Send + Sync>,
    ) -> Self {
        Self { fetcher, alerts }
    }

    pub fn alerts(&self) -> &Arc<dyn AlertSink + Send + Sync> {
        &self.alerts
    }

    /// Fetch the job's current status once.
    ///
    /// 4xx responses alert the user and are returned as [`FetchError::Rejected`];
    /// retryable failures are returned untouched for the caller to retry.
    pub async fn fetch_once(&self, job_id: &str) -> Result<JobStatus, FetchError> {
        if job_id.is_empty() {
            return Err(FetchError::EmptyJobId);
        }
        match self.fetcher.fetch_status(job_id).await {
            Ok(status) => Ok(status),
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(job_id = %job_id, "job status fetch failed: {e}");
                } else {
                    tracing::error!(job_id = %job_id, "job status fetch failed: {e}");
                }
                if let FetchError::Rejected { .. } = e {
                    self.alerts.show_error(
                        "Error",
                        &format!("Job {} not found or access denied.", job_id),
                    );
                }
                Err(e)
            }
        }
    }
}

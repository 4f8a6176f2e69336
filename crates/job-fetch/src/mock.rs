//! Scripted fetcher for tests: replays queued responses, no network.

use job_types::{FetchError, JobStatus, StatusFetcher};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Response = Result<JobStatus, FetchError>;

/// Returns queued responses in order; once one response is left it is repeated forever.
pub struct MockStatusFetcher {
    responses: Mutex<VecDeque<Response>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockStatusFetcher {
    pub fn new(responses: Vec<Response>) -> Self {
        assert!(!responses.is_empty(), "mock needs at least one response");
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Every call returns `status`.
    pub fn always(status: JobStatus) -> Self {
        Self::new(vec![Ok(status)])
    }

    /// Hold every later call in flight until `notify_one` is called on the returned handle.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    /// Number of `fetch_status` calls so far, counted when a call starts.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StatusFetcher for MockStatusFetcher {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if job_id.is_empty() {
            return Err(FetchError::EmptyJobId);
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut guard = self.responses.lock().unwrap();
        if guard.len() > 1 {
            guard.pop_front().unwrap()
        } else {
            guard.front().cloned().unwrap()
        }
    }
}

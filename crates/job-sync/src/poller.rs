//! Polling driver: fetch on a fixed interval until the job finishes or polling is cancelled.

use crate::{retry_with_backoff, RetryPolicy, StatusCache, StatusReader};
use job_types::JobStatus;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Message stored on the synthetic `FAILED` status when polling gives up.
pub const POLL_FAILED_MESSAGE: &str = "Polling failed";

const CHANNEL_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct Poller {
    reader: StatusReader,
    cache: StatusCache,
    retry: RetryPolicy,
}

impl Poller {
    pub fn new(reader: StatusReader, cache: StatusCache, retry: RetryPolicy) -> Self {
        Self {
            reader,
            cache,
            retry,
        }
    }

    /// Spawn [`Poller::run`] and return the receiving end of its status stream.
    pub fn spawn(
        &self,
        job_id: String,
        interval: Duration,
        stop: CancellationToken,
    ) -> mpsc::Receiver<JobStatus> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let poller = self.clone();
        tokio::spawn(async move { poller.run(job_id, interval, stop, tx).await });
        rx
    }

    /// Fetch immediately, then every `interval`, sending each accepted status to `tx`.
    ///
    /// Fires `stop` after a terminal status or after giving up. On give-up the
    /// synthetic `FAILED` status is sent before `stop` fires. Results that land
    /// after `stop` has fired are discarded.
    pub async fn run(
        &self,
        job_id: String,
        interval: Duration,
        stop: CancellationToken,
        tx: mpsc::Sender<JobStatus>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let reader = &self.reader;
        let id = job_id.as_str();
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                r = retry_with_backoff(&self.retry, move || reader.fetch_once(id)) => r,
            };
            if stop.is_cancelled() {
                debug!(job_id = %id, "discarding poll result after cancellation");
                break;
            }
            match result {
                Ok(status) => {
                    if !self.cache.record(status.clone()) {
                        debug!(job_id = %id, state = %status.state, "ignoring stale poll result");
                        if self.cache.get(id).is_some_and(|s| s.is_terminal()) {
                            stop.cancel();
                            break;
                        }
                        continue;
                    }
                    let terminal = status.is_terminal();
                    if tx.send(status).await.is_err() {
                        stop.cancel();
                        break;
                    }
                    if terminal {
                        info!(job_id = %id, "job reached terminal state; polling stopped");
                        stop.cancel();
                        break;
                    }
                }
                Err(e) => {
                    error!(job_id = %id, "giving up on job status polling: {e}");
                    reader
                        .alerts()
                        .show_error("Error", &format!("Failed to poll job {} status.", id));
                    let failed = self.cache.mark_failed(id, POLL_FAILED_MESSAGE);
                    let _ = tx.send(failed).await;
                    stop.cancel();
                    break;
                }
            }
        }
    }
}

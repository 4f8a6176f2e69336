//! Merge coordinator: one shared status pipeline per job, fed by push and polling.
//!
//! A pipeline fetches once, then (unless that status is terminal) polls and, when
//! the push channel is connected, listens on `/topic/job/{jobId}` as well. If no
//! push message arrives within the fallback threshold the push subscription is
//! dropped and polling alone drives the stream. Observers of the same job share
//! the pipeline; the last one to leave tears it down.

use crate::{DedupFilter, Poller, RetryPolicy, StatusCache, StatusReader, SyncError};
use job_types::{job_topic, AlertSink, FetchError, JobStatus, PushChannel, StatusFetcher};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const POLLING_INTERVAL: Duration = Duration::from_millis(2000);
pub const WEBSOCKET_FALLBACK_THRESHOLD: Duration = Duration::from_millis(4000);

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Used when a subscription does not name its own interval.
    pub poll_interval: Duration,
    /// Silence window after which the push subscription is abandoned.
    pub fallback_threshold: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLLING_INTERVAL,
            fallback_threshold: WEBSOCKET_FALLBACK_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

struct Inner {
    reader: StatusReader,
    push: Arc<dyn PushChannel + Send + Sync>,
    cache: StatusCache,
    config: SyncConfig,
    pipelines: Mutex<HashMap<String, Arc<Pipeline>>>,
}

/// Tracks jobs by merging push notifications with HTTP polling.
#[derive(Clone)]
pub struct JobSynchronizer {
    inner: Arc<Inner>,
}

impl JobSynchronizer {
    pub fn new(
        fetcher: Arc<dyn StatusFetcher + Send + Sync>,
        push: Arc<dyn PushChannel + Send + Sync>,
        alerts: Arc<dyn AlertSink + Send + Sync>,
    ) -> Self {
        Self::with_config(fetcher, push, alerts, SyncConfig::default())
    }

    pub fn with_config(
        fetcher: Arc<dyn StatusFetcher + Send + Sync>,
        push: Arc<dyn PushChannel + Send + Sync>,
        alerts: Arc<dyn AlertSink + Send + Sync>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                reader: StatusReader::new(fetcher, alerts),
                push,
                cache: StatusCache::new(),
                config,
                pipelines: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// One-shot read, bypassing pipelines. Alerts on 4xx like every other fetch.
    pub async fn get_job_once(&self, job_id: &str) -> Result<JobStatus, FetchError> {
        self.inner.reader.fetch_once(job_id).await
    }

    /// Last status seen for the job by any pipeline.
    pub fn cached_status(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.cache.get(job_id)
    }

    /// Drop the cached status for a job.
    pub fn forget(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.cache.forget(job_id)
    }

    /// Number of pipelines still running.
    pub fn active_pipelines(&self) -> usize {
        let guard = self
            .inner
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.values().filter(|p| !p.stop.is_cancelled()).count()
    }

    /// Cancel every running pipeline. Open subscriptions complete.
    pub fn shutdown(&self) {
        let guard = self
            .inner
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for pipeline in guard.values() {
            pipeline.stop.cancel();
        }
    }

    /// Subscribe to a job's merged status stream.
    ///
    /// Resolves once the first status is available; that status is the first
    /// item of the returned subscription. If the job already has a running
    /// pipeline the subscription joins it (its latest status is replayed and
    /// `interval` is ignored). The initial fetch failing is returned as an error.
    pub async fn subscribe(
        &self,
        job_id: &str,
        interval: Option<Duration>,
    ) -> Result<JobSubscription, SyncError> {
        if job_id.is_empty() {
            return Err(FetchError::EmptyJobId.into());
        }
        let interval = interval.unwrap_or(self.inner.config.poll_interval);
        let pipeline = self.pipeline_for(job_id, interval);
        let mut sub = JobSubscription::attach(Arc::clone(&self.inner), pipeline);
        if sub.pending.is_none() {
            match sub.recv().await {
                Some(status) => sub.pending = Some(status),
                None => return Err(sub.guard.pipeline.failure()),
            }
        }
        Ok(sub)
    }

    /// Find or start the job's pipeline and count the caller as an observer.
    ///
    /// Joining and leaving both happen under the registry lock, so a pipeline
    /// being torn down by its last observer is never handed out.
    fn pipeline_for(&self, job_id: &str, interval: Duration) -> Arc<Pipeline> {
        let mut guard = self
            .inner
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = guard.get(job_id) {
            if !existing.stop.is_cancelled() {
                debug!(job_id = %job_id, "joining running job pipeline");
                existing.observers.fetch_add(1, Ordering::SeqCst);
                return Arc::clone(existing);
            }
        }
        let pipeline = Arc::new(Pipeline::new(job_id));
        pipeline.observers.fetch_add(1, Ordering::SeqCst);
        guard.insert(job_id.to_string(), Arc::clone(&pipeline));
        tokio::spawn(run_pipeline(
            Arc::clone(&self.inner),
            Arc::clone(&pipeline),
            interval,
        ));
        pipeline
    }
}

impl Inner {
    fn remove_pipeline(&self, pipeline: &Arc<Pipeline>) {
        let mut guard = self.pipelines.lock().unwrap_or_else(PoisonError::into_inner);
        if guard
            .get(&pipeline.job_id)
            .is_some_and(|p| Arc::ptr_eq(p, pipeline))
        {
            guard.remove(&pipeline.job_id);
        }
    }
}

struct Shared {
    latest: Option<JobStatus>,
    failure: Option<FetchError>,
    /// Dropped when the pipeline finishes, which closes every receiver.
    tx: Option<broadcast::Sender<JobStatus>>,
}

struct Pipeline {
    job_id: String,
    stop: CancellationToken,
    observers: AtomicUsize,
    shared: Mutex<Shared>,
}

impl Pipeline {
    fn new(job_id: &str) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            job_id: job_id.to_string(),
            stop: CancellationToken::new(),
            observers: AtomicUsize::new(0),
            shared: Mutex::new(Shared {
                latest: None,
                failure: None,
                tx: Some(tx),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, status: JobStatus) {
        let mut shared = self.lock();
        shared.latest = Some(status.clone());
        if let Some(ref tx) = shared.tx {
            let _ = tx.send(status);
        }
    }

    fn fail(&self, error: FetchError) {
        self.lock().failure = Some(error);
    }

    fn close(&self) {
        self.lock().tx = None;
    }

    fn failure(&self) -> SyncError {
        match self.lock().failure.clone() {
            Some(e) => SyncError::Fetch(e),
            None => SyncError::Closed,
        }
    }
}

/// Decrements the observer count on drop; the last observer cancels the pipeline.
struct ObserverGuard {
    inner: Arc<Inner>,
    pipeline: Arc<Pipeline>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        let _registry = self
            .inner
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.pipeline.observers.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!(job_id = %self.pipeline.job_id, "last observer left; stopping pipeline");
            self.pipeline.stop.cancel();
        }
    }
}

/// One observer's view of a job's merged status stream.
///
/// Yields the replayed latest status first, then every new status, and ends
/// after a terminal status (or when the pipeline stops).
pub struct JobSubscription {
    pending: Option<JobStatus>,
    rx: Option<broadcast::Receiver<JobStatus>>,
    done: bool,
    guard: ObserverGuard,
}

impl std::fmt::Debug for JobSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubscription")
            .field("job_id", &self.guard.pipeline.job_id)
            .field("done", &self.done)
            .finish()
    }
}

impl JobSubscription {
    /// The observer count was already raised by `pipeline_for`.
    fn attach(inner: Arc<Inner>, pipeline: Arc<Pipeline>) -> Self {
        let (pending, rx) = {
            let shared = pipeline.lock();
            (
                shared.latest.clone(),
                shared.tx.as_ref().map(|tx| tx.subscribe()),
            )
        };
        Self {
            pending,
            rx,
            done: false,
            guard: ObserverGuard { inner, pipeline },
        }
    }

    pub fn job_id(&self) -> &str {
        &self.guard.pipeline.job_id
    }

    /// Next status, or `None` once the stream has completed.
    pub async fn next(&mut self) -> Option<JobStatus> {
        if self.done {
            return None;
        }
        let next = match self.pending.take() {
            Some(status) => Some(status),
            None => self.recv().await,
        };
        match next {
            Some(status) => {
                if status.is_terminal() {
                    self.done = true;
                    self.rx = None;
                }
                Some(status)
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    async fn recv(&mut self) -> Option<JobStatus> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.guard.pipeline.job_id, skipped, "job subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

async fn run_pipeline(inner: Arc<Inner>, pipeline: Arc<Pipeline>, interval: Duration) {
    let job_id = pipeline.job_id.clone();
    let initial = tokio::select! {
        biased;
        _ = pipeline.stop.cancelled() => None,
        r = inner.reader.fetch_once(&job_id) => Some(r),
    };
    match initial {
        None => debug!(job_id = %job_id, "pipeline cancelled before initial fetch completed"),
        Some(Err(e)) => {
            warn!(job_id = %job_id, "initial job status fetch failed: {e}");
            pipeline.fail(e);
        }
        Some(Ok(status)) => {
            inner.cache.store(status.clone());
            let mut dedup = DedupFilter::new();
            dedup.admit(&status);
            let terminal = status.is_terminal();
            pipeline.publish(status);
            if terminal {
                info!(job_id = %job_id, "job already finished; nothing to track");
            } else {
                merge(&inner, &pipeline, interval, dedup).await;
            }
        }
    }
    pipeline.stop.cancel();
    pipeline.close();
    inner.remove_pipeline(&pipeline);
}

/// Race push against polling until a terminal status or cancellation.
async fn merge(inner: &Inner, pipeline: &Pipeline, interval: Duration, mut dedup: DedupFilter) {
    let job_id = pipeline.job_id.as_str();
    let stop = &pipeline.stop;
    let poller = Poller::new(inner.reader.clone(), inner.cache.clone(), inner.config.retry);
    let mut polled = poller.spawn(job_id.to_string(), interval, stop.clone());

    let mut push = if inner.push.is_connected() {
        info!(job_id = %job_id, "tracking job via push with polling alongside");
        Some(inner.push.subscribe(&job_topic(job_id)))
    } else {
        info!(job_id = %job_id, "push channel unavailable; tracking job by polling");
        None
    };
    let mut awaiting_push = push.is_some();
    let fallback = tokio::time::sleep(inner.config.fallback_threshold);
    tokio::pin!(fallback);

    loop {
        let status = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                // Polling sends its final status before firing stop.
                while let Ok(status) = polled.try_recv() {
                    if deliver(pipeline, &mut dedup, status) {
                        break;
                    }
                }
                break;
            }
            _ = &mut fallback, if awaiting_push => {
                warn!(
                    job_id = %job_id,
                    threshold_ms = inner.config.fallback_threshold.as_millis() as u64,
                    "no push update in time; falling back to polling"
                );
                awaiting_push = false;
                push = None;
                continue;
            }
            msg = recv_push(&mut push), if push.is_some() => match msg {
                Some(status) => {
                    awaiting_push = false;
                    if !inner.cache.record(status.clone()) {
                        debug!(job_id = %job_id, state = %status.state, "ignoring stale push update");
                        continue;
                    }
                    status
                }
                None => {
                    debug!(job_id = %job_id, "push subscription closed; relying on polling");
                    awaiting_push = false;
                    push = None;
                    continue;
                }
            },
            msg = polled.recv() => match msg {
                Some(status) => status,
                None => break,
            },
        };
        if deliver(pipeline, &mut dedup, status) {
            stop.cancel();
            break;
        }
    }
}

/// Publish `status` unless it repeats or regresses the last emission.
/// Returns true when a terminal status was published.
fn deliver(pipeline: &Pipeline, dedup: &mut DedupFilter, status: JobStatus) -> bool {
    if dedup.last().is_some_and(|last| status.regresses(last)) {
        debug!(job_id = %pipeline.job_id, state = %status.state, "dropping out-of-order status");
        return false;
    }
    if !dedup.admit(&status) {
        return false;
    }
    let terminal = status.is_terminal();
    pipeline.publish(status);
    terminal
}

async fn recv_push(push: &mut Option<mpsc::UnboundedReceiver<JobStatus>>) -> Option<JobStatus> {
    match push {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

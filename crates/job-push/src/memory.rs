//! In-process push channel: publishers and subscribers share one router.

use crate::TopicRouter;
use job_types::{JobStatus, PushChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Push channel backed by an in-memory router. Connectivity is a flag the owner controls.
pub struct InMemoryPushChannel {
    router: TopicRouter,
    connected: AtomicBool,
}

impl InMemoryPushChannel {
    pub fn new(connected: bool) -> Self {
        Self {
            router: TopicRouter::new(),
            connected: AtomicBool::new(connected),
        }
    }

    /// A channel that reports itself disconnected, so callers poll only.
    pub fn disconnected() -> Self {
        Self::new(false)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Publish a status on `topic`; returns the number of subscribers reached.
    pub fn publish(&self, topic: &str, status: &JobStatus) -> usize {
        self.router.dispatch(topic, status)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.router.subscriber_count(topic)
    }
}

impl PushChannel for InMemoryPushChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<JobStatus> {
        self.router.subscribe(topic)
    }
}

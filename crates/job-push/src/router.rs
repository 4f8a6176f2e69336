//! Topic fan-out shared by the push channel implementations.

use job_types::JobStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Maps topics to live subscriber senders. Closed receivers are pruned on dispatch.
#[derive(Default)]
pub struct TopicRouter {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<JobStatus>>>>,
    closed: AtomicBool,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver for `topic`. After [`TopicRouter::close`] the receiver is already ended.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<JobStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.topics.lock() {
            Ok(mut guard) => {
                if !self.closed.load(Ordering::SeqCst) {
                    guard.entry(topic.to_string()).or_default().push(tx);
                }
            }
            Err(e) => tracing::error!("topic router lock poisoned: {e}"),
        }
        rx
    }

    /// End every subscription; receivers see `None` once drained.
    pub fn close(&self) {
        match self.topics.lock() {
            Ok(mut guard) => {
                self.closed.store(true, Ordering::SeqCst);
                guard.clear();
            }
            Err(e) => tracing::error!("topic router lock poisoned: {e}"),
        }
    }

    /// Deliver `status` to every live subscriber of `topic`; returns how many received it.
    pub fn dispatch(&self, topic: &str, status: &JobStatus) -> usize {
        let mut guard = match self.topics.lock() {
            Ok(g) => g,
            Err(e) => {
                tracing::error!("topic router lock poisoned: {e}");
                return 0;
            }
        };
        let Some(senders) = guard.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(status.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            guard.remove(topic);
        }
        delivered
    }

    /// Live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        match self.topics.lock() {
            Ok(mut guard) => {
                let count = match guard.get_mut(topic) {
                    Some(senders) => {
                        senders.retain(|tx| !tx.is_closed());
                        senders.len()
                    }
                    None => 0,
                };
                if count == 0 {
                    guard.remove(topic);
                }
                count
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::JobState;

    fn status(state: JobState) -> JobStatus {
        JobStatus::new("j", state, "t")
    }

    #[tokio::test]
    async fn delivers_only_to_matching_topic() {
        let router = TopicRouter::new();
        let mut a = router.subscribe("/topic/job/a");
        let mut b = router.subscribe("/topic/job/b");
        assert_eq!(router.dispatch("/topic/job/a", &status(JobState::Pending)), 1);
        assert_eq!(a.recv().await.unwrap().state, JobState::Pending);
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_ends_current_and_later_subscriptions() {
        let router = TopicRouter::new();
        let mut before = router.subscribe("t");
        router.dispatch("t", &status(JobState::InProgress));
        router.close();
        assert_eq!(before.recv().await.unwrap().state, JobState::InProgress);
        assert!(before.recv().await.is_none());
        let mut after = router.subscribe("t");
        assert!(after.recv().await.is_none());
        assert_eq!(router.dispatch("t", &status(JobState::Completed)), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let router = TopicRouter::new();
        let keep = router.subscribe("t");
        let gone = router.subscribe("t");
        assert_eq!(router.subscriber_count("t"), 2);
        drop(gone);
        assert_eq!(router.subscriber_count("t"), 1);
        assert_eq!(router.dispatch("t", &status(JobState::Completed)), 1);
        drop(keep);
        assert_eq!(router.dispatch("t", &status(JobState::Completed)), 0);
        assert_eq!(router.subscriber_count("t"), 0);
    }
}

//! Last known status per job, readable without awaiting.

use job_types::JobStatus;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared per-job status cache. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    entries: Arc<RwLock<HashMap<String, JobStatus>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(job_id).cloned()
    }

    /// Store unconditionally (used for the authoritative initial fetch).
    pub fn store(&self, status: JobStatus) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(status.job_id.clone(), status);
    }

    /// Store `status` unless it regresses the cached observation.
    /// Returns false when the status was refused as stale.
    pub fn record(&self, status: JobStatus) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = guard.get(&status.job_id) {
            if status.regresses(prev) {
                return false;
            }
        }
        guard.insert(status.job_id.clone(), status);
        true
    }

    /// Mark the job failed, keeping whatever else is cached for it.
    /// A cached terminal status is left alone and returned as is.
    pub fn mark_failed(&self, job_id: &str, message: &str) -> JobStatus {
        let now = chrono::Utc::now().to_rfc3339();
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let status = match guard.get(job_id) {
            Some(prev) if prev.is_terminal() => return prev.clone(),
            Some(prev) => prev.failed(message, now),
            None => JobStatus::new(job_id, job_types::JobState::Failed, now).with_message(message),
        };
        guard.insert(job_id.to_string(), status.clone());
        status
    }

    pub fn forget(&self, job_id: &str) -> Option<JobStatus> {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::JobState;

    #[test]
    fn refuses_stale_updates() {
        let cache = StatusCache::new();
        let half = JobStatus::new("j", JobState::InProgress, "t").with_progress(50.0);
        assert!(cache.record(half.clone()));
        assert!(!cache.record(JobStatus::new("j", JobState::Pending, "t")));
        assert!(!cache.record(half.clone().with_progress(40.0)));
        assert!(cache.record(JobStatus::new("j", JobState::Completed, "t")));
        assert!(!cache.record(half));
        assert_eq!(cache.get("j").unwrap().state, JobState::Completed);
    }

    #[test]
    fn mark_failed_keeps_correlation_fields() {
        let cache = StatusCache::new();
        let mut s = JobStatus::new("j", JobState::InProgress, "t").with_progress(70.0);
        s.project_id = Some("p".into());
        cache.store(s);
        let failed = cache.mark_failed("j", "Polling failed");
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.message.as_deref(), Some("Polling failed"));
        assert_eq!(failed.project_id.as_deref(), Some("p"));
        assert_eq!(cache.get("j"), Some(failed));
    }

    #[test]
    fn mark_failed_without_prior_status() {
        let cache = StatusCache::new();
        let failed = cache.mark_failed("x", "Polling failed");
        assert_eq!(failed.job_id, "x");
        assert_eq!(failed.state, JobState::Failed);
    }

    #[test]
    fn mark_failed_leaves_terminal_status() {
        let cache = StatusCache::new();
        cache.store(JobStatus::new("j", JobState::Completed, "t"));
        assert_eq!(cache.mark_failed("j", "Polling failed").state, JobState::Completed);
    }

    #[test]
    fn clones_share_entries() {
        let a = StatusCache::new();
        let b = a.clone();
        a.store(JobStatus::new("j", JobState::Pending, "t"));
        assert!(b.get("j").is_some());
        assert_eq!(b.forget("j").map(|s| s.state), Some(JobState::Pending));
        assert!(a.is_empty());
    }
}

//! Suppresses consecutive observations that repeat state and progress.

use job_types::JobStatus;

/// Remembers the last admitted status; a new status equal on `(state, progress)` is dropped.
#[derive(Debug, Default, Clone)]
pub struct DedupFilter {
    last: Option<JobStatus>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and remembers `status`) when it differs from the last admitted one.
    pub fn admit(&mut self, status: &JobStatus) -> bool {
        if let Some(ref last) = self.last {
            if last.same_observation(status) {
                return false;
            }
        }
        self.last = Some(status.clone());
        true
    }

    pub fn last(&self) -> Option<&JobStatus> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::JobState;

    fn st(state: JobState, progress: Option<f64>, message: &str) -> JobStatus {
        let mut s = JobStatus::new("j", state, "t").with_message(message);
        s.progress = progress;
        s
    }

    #[test]
    fn drops_repeats_of_state_and_progress() {
        let mut f = DedupFilter::new();
        assert!(f.admit(&st(JobState::Pending, None, "queued")));
        assert!(!f.admit(&st(JobState::Pending, None, "still queued")));
        assert!(f.admit(&st(JobState::InProgress, Some(10.0), "a")));
        assert!(!f.admit(&st(JobState::InProgress, Some(10.0), "b")));
        assert!(f.admit(&st(JobState::InProgress, Some(20.0), "b")));
        assert_eq!(f.last().and_then(|s| s.progress), Some(20.0));
    }

    #[test]
    fn only_compares_with_immediate_predecessor() {
        let mut f = DedupFilter::new();
        assert!(f.admit(&st(JobState::InProgress, Some(10.0), "")));
        assert!(f.admit(&st(JobState::InProgress, None, "")));
        assert!(f.admit(&st(JobState::InProgress, Some(10.0), "")));
    }
}

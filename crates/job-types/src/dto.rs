//! Job status DTOs as exchanged with the job service (REST body and push payload).

use serde::{Deserialize, Serialize};

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Completed, failed and cancelled jobs never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Ordering used by the stale-update guard: pending < in progress < any terminal state.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::InProgress => 1,
            JobState::Completed | JobState::Failed | JobState::Cancelled => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    /// Percentage in [0, 100].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// ISO8601; display only, never used for ordering.
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl JobStatus {
    pub fn new(job_id: impl Into<String>, state: JobState, updated_at: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state,
            progress: None,
            message: None,
            updated_at: updated_at.into(),
            result_id: None,
            project_id: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Two observations are the same for dedup purposes when state and progress match.
    /// Message and timestamp differences are ignored.
    pub fn same_observation(&self, other: &JobStatus) -> bool {
        self.state == other.state && self.progress == other.progress
    }

    /// True when `self` would move the job backwards relative to `prev`.
    pub fn regresses(&self, prev: &JobStatus) -> bool {
        if prev.is_terminal() {
            return true;
        }
        if self.state.rank() != prev.state.rank() {
            return self.state.rank() < prev.state.rank();
        }
        match (self.progress, prev.progress) {
            (Some(p), Some(q)) if self.state == prev.state => p < q,
            _ => false,
        }
    }

    /// Copy of this status marked `FAILED` with the given message.
    pub fn failed(&self, message: impl Into<String>, updated_at: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            message: Some(message.into()),
            updated_at: updated_at.into(),
            ..self.clone()
        }
    }
}

/// Response envelope used by the relay service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> i32 {
    200
}

pub type JobStatusResponse = BaseResponse<JobStatus>;

/// Push-channel topic carrying updates for one job.
pub fn job_topic(job_id: &str) -> String {
    format!("/topic/job/{}", job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_service_payload() {
        let j = serde_json::json!({
            "jobId": "job-1",
            "state": "IN_PROGRESS",
            "progress": 42.5,
            "message": "Analyzing",
            "updatedAt": "2024-05-01T10:00:00Z",
            "projectId": "p-9"
        });
        let s: JobStatus = serde_json::from_value(j).unwrap();
        assert_eq!(s.job_id, "job-1");
        assert_eq!(s.state, JobState::InProgress);
        assert_eq!(s.progress, Some(42.5));
        assert_eq!(s.project_id.as_deref(), Some("p-9"));
        assert!(s.result_id.is_none());
    }

    #[test]
    fn serializes_camel_case_and_skips_absent_fields() {
        let s = JobStatus::new("j", JobState::Completed, "t").with_progress(100.0);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["jobId"], "j");
        assert_eq!(v["state"], "COMPLETED");
        assert_eq!(v["updatedAt"], "t");
        assert!(v.get("message").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn same_observation_ignores_message_and_timestamp() {
        let a = JobStatus::new("j", JobState::InProgress, "t1")
            .with_progress(10.0)
            .with_message("a");
        let b = JobStatus::new("j", JobState::InProgress, "t2")
            .with_progress(10.0)
            .with_message("b");
        assert!(a.same_observation(&b));
        assert!(!a.same_observation(&b.clone().with_progress(11.0)));
    }

    #[test]
    fn regression_rules() {
        let pending = JobStatus::new("j", JobState::Pending, "t");
        let half = JobStatus::new("j", JobState::InProgress, "t").with_progress(50.0);
        let quarter = JobStatus::new("j", JobState::InProgress, "t").with_progress(25.0);
        let done = JobStatus::new("j", JobState::Completed, "t");
        assert!(pending.regresses(&half));
        assert!(quarter.regresses(&half));
        assert!(!half.regresses(&quarter));
        assert!(!done.regresses(&half));
        assert!(half.regresses(&done));
        assert!(done.regresses(&done));
    }

    #[test]
    fn topic_is_keyed_by_job() {
        assert_eq!(job_topic("abc"), "/topic/job/abc");
    }
}

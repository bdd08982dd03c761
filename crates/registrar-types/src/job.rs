//! Job records and the job state machine.
//!
//! ```text
//!   start_job ──→ Pending ──→ In Progress ──→ Succeeded
//!                    │          │   ▲    │
//!                    │          ▼   │    └──→ Failed
//!                    │        Retrying
//!                    │          │
//!                    └──────────┴──────────→ Canceled
//! ```
//!
//! Succeeded, Failed and Canceled are terminal: a job never leaves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Succeeded,
    Failed,
    Retrying,
    Canceled,
}

impl JobState {
    /// States in which a job is still being processed.
    pub const PROCESSING: [JobState; 3] =
        [JobState::Pending, JobState::InProgress, JobState::Retrying];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::InProgress => "In Progress",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Retrying => "Retrying",
            JobState::Canceled => "Canceled",
        }
    }

    /// Parse the wire representation produced by [`JobState::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(JobState::Pending),
            "In Progress" => Some(JobState::InProgress),
            "Succeeded" => Some(JobState::Succeeded),
            "Failed" => Some(JobState::Failed),
            "Retrying" => Some(JobState::Retrying),
            "Canceled" => Some(JobState::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }

    pub fn is_processing(self) -> bool {
        Self::PROCESSING.contains(&self)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (InProgress, Succeeded) | (InProgress, Failed) | (InProgress, Retrying) => true,
            (Retrying, InProgress) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact recorded when a job succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One asynchronous operation, as kept by a job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub owner: String,
    /// Logical kind of the job, e.g. `masters-in-cs:read:ListProgramEnrollments`.
    pub name: String,
    pub created: DateTime<Utc>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            owner: owner.into(),
            name: name.into(),
            created: Utc::now(),
            state: JobState::Pending,
            result: None,
            failure: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id.clone(),
            created: self.created,
            state: self.state,
            result: self.result.as_ref().map(|r| r.url.clone()),
            text: self.result.as_ref().and_then(|r| r.text.clone()),
        }
    }
}

/// Job status as reported to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub created: DateTime<Utc>,
    pub state: JobState,
    /// URL of the result file; `null` until the job has succeeded.
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A compare-and-set change to a job record: applied only if the record is in `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub from: JobState,
    pub to: JobState,
    pub result: Option<JobResult>,
    pub failure: Option<String>,
}

impl JobTransition {
    pub fn new(from: JobState, to: JobState) -> Self {
        Self {
            from,
            to,
            result: None,
            failure: None,
        }
    }

    pub fn with_result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Apply to `job`, assuming the state check already passed.
    pub fn apply(&self, job: &mut Job) {
        job.state = self.to;
        if let Some(ref r) = self.result {
            job.result = Some(r.clone());
        }
        if let Some(ref f) = self.failure {
            job.failure = Some(f.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use JobState::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Retrying.can_transition_to(Canceled));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Retrying.can_transition_to(Succeeded));
        for terminal in [Succeeded, Failed, Canceled] {
            for next in [Pending, InProgress, Succeeded, Failed, Retrying, Canceled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn state_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobState::InProgress).unwrap(),
            "\"In Progress\""
        );
        for s in [
            JobState::Pending,
            JobState::InProgress,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Retrying,
            JobState::Canceled,
        ] {
            assert_eq!(JobState::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobState::parse("Done"), None);
    }

    #[test]
    fn status_exposes_result_url_only_after_success() {
        let mut job = Job::new("j1", "alice", "prog:read:ListProgramEnrollments");
        assert_eq!(job.status().result, None);

        JobTransition::new(JobState::InProgress, JobState::Succeeded)
            .with_result(JobResult {
                url: "/media/registrar/job-results/j1.json".to_string(),
                text: Some("200".to_string()),
            })
            .apply(&mut job);
        let status = job.status();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.result.as_deref(), Some("/media/registrar/job-results/j1.json"));
        assert_eq!(status.text.as_deref(), Some("200"));
    }
}

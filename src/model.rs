use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a run by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

/// Identifier of one job inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for RunId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Status vocabulary shared by runs and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled | RunStatus::Skipped
        )
    }

    /// Progress rank: pending < running < any terminal value.
    fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            _ => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key/value pair passed to the remote pipeline at trigger time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// What the remote service hands back when a run is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRun {
    pub id: RunId,
    pub status: Option<RunStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub parameters: Vec<Parameter>,
    pub status: Option<RunStatus>,
    pub triggered_at: String,
}

impl Run {
    /// Apply an observed status. Regressions and changes after a terminal
    /// value are ignored; returns whether the stored status changed.
    pub fn advance(&mut self, observed: RunStatus) -> bool {
        match self.status {
            Some(current) if current.is_terminal() => false,
            Some(current) if observed.rank() < current.rank() => false,
            Some(current) if current == observed => false,
            _ => {
                self.status = Some(observed);
                true
            }
        }
    }
}

/// A job as listed by the remote service, before its log is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: RunStatus,
    pub log: String,
    #[serde(default)]
    pub log_error: Option<String>,
}

impl Job {
    pub fn with_log(summary: JobSummary, log: String) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            status: summary.status,
            log,
            log_error: None,
        }
    }

    pub fn with_log_error(summary: JobSummary, log_error: String) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            status: summary.status,
            log: String::new(),
            log_error: Some(log_error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Triggering,
    Polling,
    Aggregating,
    Done,
    Error,
}

/// Live orchestrator state. Observers only ever see cloned snapshots of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub phase: Phase,
    pub active_run: Option<Run>,
    pub jobs: Vec<Job>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub artifacts_url: Option<String>,
}

impl Session {
    pub fn run_status(&self) -> Option<RunStatus> {
        self.active_run.as_ref().and_then(|run| run.status)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: Option<RunStatus>) -> Run {
        Run {
            id: RunId::from(42),
            git_ref: "main".into(),
            parameters: Vec::new(),
            status,
            triggered_at: String::new(),
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(RunStatus::Skipped.is_terminal());
    }

    #[test]
    fn advance_moves_forward_only() {
        let mut r = run(None);
        assert!(r.advance(RunStatus::Running));
        assert!(!r.advance(RunStatus::Pending));
        assert_eq!(r.status, Some(RunStatus::Running));
        assert!(!r.advance(RunStatus::Running));
        assert!(r.advance(RunStatus::Failed));
        assert!(!r.advance(RunStatus::Success));
        assert_eq!(r.status, Some(RunStatus::Failed));
    }

    #[test]
    fn job_constructors() {
        let summary = JobSummary {
            id: JobId::from(7),
            name: "build".into(),
            status: RunStatus::Success,
        };
        let job = Job::with_log_error(summary.clone(), "boom".into());
        assert!(job.log.is_empty());
        assert_eq!(job.log_error.as_deref(), Some("boom"));

        let job = Job::with_log(summary, "ok\n".into());
        assert_eq!(job.log, "ok\n");
        assert!(job.log_error.is_none());
    }

    #[test]
    fn session_serializes_run_ref_field() {
        let session = Session {
            phase: Phase::Polling,
            active_run: Some(run(Some(RunStatus::Running))),
            ..Default::default()
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["phase"], "polling");
        assert_eq!(json["active_run"]["ref"], "main");
        assert_eq!(json["active_run"]["id"], "42");
        assert_eq!(json["active_run"]["status"], "running");
    }
}

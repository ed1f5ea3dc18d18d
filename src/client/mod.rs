//! Remote CI service boundary.
//!
//! The orchestrator only talks to the service through [`RunClient`]; the
//! GitLab adapter is the production implementation.

#[cfg(test)]
pub(crate) mod fake;
mod gitlab;

pub use gitlab::GitLabClient;

use crate::error::RemoteError;
use crate::model::{JobId, JobSummary, Parameter, RunId, RunStatus, StartedRun};

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The remote operations the run lifecycle needs. Implementations carry no
/// policy: no retries, no status interpretation beyond mapping to [`RunStatus`].
#[async_trait::async_trait]
pub trait RunClient: Send + Sync {
    async fn start_run(&self, git_ref: &str, parameters: &[Parameter]) -> RemoteResult<StartedRun>;

    async fn get_run_status(&self, run_id: &RunId) -> RemoteResult<RunStatus>;

    /// Jobs of a run, in the order the service lists them.
    async fn list_jobs(&self, run_id: &RunId) -> RemoteResult<Vec<JobSummary>>;

    async fn get_job_log(&self, job_id: &JobId) -> RemoteResult<String>;

    /// Refs a run can be started against.
    async fn list_refs(&self) -> RemoteResult<Vec<String>> {
        Ok(Vec::new())
    }
}

//! Post-run log collection.
//!
//! Lists the jobs of a finished run and fetches every job log concurrently.
//! Only the listing can fail the pass; a failed log fetch is recorded on its job.

use crate::client::{RemoteResult, RunClient};
use crate::model::{Job, JobSummary, RunId};
use futures::{stream, StreamExt};
use std::sync::Arc;

#[derive(Clone)]
pub struct LogAggregator {
    client: Arc<dyn RunClient>,
    max_concurrency: Option<usize>,
}

impl LogAggregator {
    pub fn new(client: Arc<dyn RunClient>, max_concurrency: Option<usize>) -> Self {
        Self {
            client,
            max_concurrency,
        }
    }

    /// Jobs of `run_id` with their logs, in listing order.
    pub async fn collect(&self, run_id: &RunId) -> RemoteResult<Vec<Job>> {
        let summaries = self.client.list_jobs(run_id).await?;
        let limit = self
            .max_concurrency
            .unwrap_or(summaries.len())
            .max(1);
        tracing::debug!(run_id = %run_id, jobs = summaries.len(), limit, "collecting job logs");

        // `buffered` yields in input order no matter which fetch finishes first.
        let jobs: Vec<Job> = stream::iter(summaries)
            .map(|summary| self.fetch_log(summary))
            .buffered(limit)
            .collect()
            .await;

        let failed = jobs.iter().filter(|job| job.log_error.is_some()).count();
        tracing::info!(run_id = %run_id, jobs = jobs.len(), failed, "job logs collected");
        Ok(jobs)
    }

    async fn fetch_log(&self, summary: JobSummary) -> Job {
        match self.client.get_job_log(&summary.id).await {
            Ok(log) => Job::with_log(summary, log),
            Err(err) => {
                tracing::warn!(job = %summary.name, job_id = %summary.id, error = %err, "log fetch failed");
                let message = format!("failed to fetch log for job {}: {}", summary.name, err);
                Job::with_log_error(summary, message)
            }
        }
    }
}

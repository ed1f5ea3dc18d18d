//! Scripted in-memory [`RunClient`] for tests.

use super::{RemoteResult, RunClient};
use crate::error::RemoteError;
use crate::model::{JobId, JobSummary, Parameter, RunId, RunStatus, StartedRun};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct FakeState {
    start_results: VecDeque<RemoteResult<StartedRun>>,
    statuses: HashMap<RunId, VecDeque<RemoteResult<RunStatus>>>,
    jobs: HashMap<RunId, RemoteResult<Vec<JobSummary>>>,
    logs: HashMap<JobId, (Duration, RemoteResult<String>)>,
    list_jobs_gates: HashMap<RunId, Arc<Notify>>,
    refs: Vec<String>,
    start_calls: Vec<(String, Vec<Parameter>)>,
    status_calls: usize,
    log_calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeRunClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start(&self, result: RemoteResult<StartedRun>) {
        self.state.lock().start_results.push_back(result);
    }

    pub fn start_ok(&self, id: u64, status: RunStatus) {
        self.push_start(Ok(StartedRun {
            id: RunId::from(id),
            status: Some(status),
        }));
    }

    /// Statuses returned by successive polls; the last one repeats once the script runs out.
    pub fn script_statuses(&self, id: u64, statuses: Vec<RemoteResult<RunStatus>>) {
        self.state
            .lock()
            .statuses
            .insert(RunId::from(id), statuses.into());
    }

    pub fn set_jobs(&self, id: u64, jobs: RemoteResult<Vec<JobSummary>>) {
        self.state.lock().jobs.insert(RunId::from(id), jobs);
    }

    pub fn set_log(&self, job_id: u64, delay: Duration, log: RemoteResult<String>) {
        self.state
            .lock()
            .logs
            .insert(JobId::from(job_id), (delay, log));
    }

    /// Hold `list_jobs` for this run until the returned handle is notified.
    pub fn gate_list_jobs(&self, id: u64) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .lock()
            .list_jobs_gates
            .insert(RunId::from(id), gate.clone());
        gate
    }

    pub fn set_refs(&self, refs: Vec<&str>) {
        self.state.lock().refs = refs.into_iter().map(String::from).collect();
    }

    pub fn start_calls(&self) -> Vec<(String, Vec<Parameter>)> {
        self.state.lock().start_calls.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn log_calls(&self) -> usize {
        self.state.lock().log_calls
    }
}

pub(crate) fn job(id: u64, name: &str, status: RunStatus) -> JobSummary {
    JobSummary {
        id: JobId::from(id),
        name: name.to_string(),
        status,
    }
}

#[async_trait::async_trait]
impl RunClient for FakeRunClient {
    async fn start_run(&self, git_ref: &str, parameters: &[Parameter]) -> RemoteResult<StartedRun> {
        let mut state = self.state.lock();
        state
            .start_calls
            .push((git_ref.to_string(), parameters.to_vec()));
        state
            .start_results
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::transport("no scripted start result")))
    }

    async fn get_run_status(&self, run_id: &RunId) -> RemoteResult<RunStatus> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        let script = state
            .statuses
            .get_mut(run_id)
            .ok_or_else(|| RemoteError::http(404, "Not Found - 404 Not found"))?;
        if script.len() > 1 {
            script
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::transport("empty status script")))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(RemoteError::transport("empty status script")))
        }
    }

    async fn list_jobs(&self, run_id: &RunId) -> RemoteResult<Vec<JobSummary>> {
        let gate = self.state.lock().list_jobs_gates.get(run_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state
            .lock()
            .jobs
            .get(run_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn get_job_log(&self, job_id: &JobId) -> RemoteResult<String> {
        let (delay, result) = {
            let mut state = self.state.lock();
            state.log_calls += 1;
            state
                .logs
                .get(job_id)
                .cloned()
                .unwrap_or_else(|| (Duration::ZERO, Ok(String::new())))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn list_refs(&self) -> RemoteResult<Vec<String>> {
        Ok(self.state.lock().refs.clone())
    }
}

//! Run lifecycle controller.
//!
//! A single event loop owns the [`Session`] and is the only place it is mutated.
//! Triggers from callers, poller ticks and collection results all arrive as
//! [`Command`]s on one channel, so transitions are applied strictly in order and
//! every published snapshot is a complete state.

use super::aggregator::LogAggregator;
use super::poller::{PollEvent, PollSink, StatusPoller};
use super::session::{SessionStore, Subscription};
use crate::client::{RemoteResult, RunClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Job, Parameter, Phase, Run, RunId, RunStatus, Session, StartedRun};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;

/// Everything the loop reacts to.
#[derive(Debug)]
enum Command {
    Trigger {
        git_ref: String,
        parameters: Vec<Parameter>,
    },
    /// Outcome of a StartRun issued for trigger number `attempt`.
    Started {
        attempt: u64,
        git_ref: String,
        parameters: Vec<Parameter>,
        result: RemoteResult<StartedRun>,
    },
    Poll {
        run_id: RunId,
        event: PollEvent,
    },
    Collected {
        run_id: RunId,
        result: RemoteResult<Vec<Job>>,
    },
    Shutdown,
}

/// Caller-facing handle to the orchestrator loop. Cheap to clone.
#[derive(Clone)]
pub struct RunOrchestrator {
    cmd_tx: UnboundedSender<Command>,
    store: SessionStore,
    config: Arc<Config>,
    closed: Arc<AtomicBool>,
}

impl RunOrchestrator {
    /// Start the orchestrator loop on the current runtime.
    pub fn spawn(client: Arc<dyn RunClient>, config: Config) -> (Self, JoinHandle<()>) {
        let config = Arc::new(config);
        let store = SessionStore::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let controller = Controller {
            aggregator: LogAggregator::new(client.clone(), config.log_concurrency),
            poller: StatusPoller::new(client.clone()),
            client,
            config: config.clone(),
            store: store.clone(),
            session: Session::default(),
            cmd_tx: cmd_tx.downgrade(),
            attempt: 0,
            in_flight: None,
        };
        let handle = tokio::spawn(controller.run(cmd_rx));

        let orchestrator = Self {
            cmd_tx,
            store,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (orchestrator, handle)
    }

    /// Start a run on `git_ref`, superseding whatever the session currently holds.
    ///
    /// Input problems are reported here; everything else shows up in snapshots.
    pub fn trigger(&self, git_ref: &str, parameters: Vec<Parameter>) -> Result<()> {
        let git_ref = git_ref.trim();
        if git_ref.is_empty() {
            return Err(Error::invalid_request("a ref is required to start a run"));
        }
        self.config.identity()?;
        if self.config.poll_interval.is_zero() {
            return Err(Error::invalid_request("poll interval must be greater than zero"));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        self.cmd_tx
            .send(Command::Trigger {
                git_ref: git_ref.to_string(),
                parameters,
            })
            .map_err(|_| Error::Shutdown)
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(Arc<Session>) + Send + Sync + 'static,
    {
        self.store.subscribe(Arc::new(observer))
    }

    pub fn current_snapshot(&self) -> Arc<Session> {
        self.store.current()
    }

    /// Stop polling and end the loop. Later triggers fail with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.cmd_tx.send(Command::Shutdown);
        }
    }
}

struct Controller {
    client: Arc<dyn RunClient>,
    config: Arc<Config>,
    store: SessionStore,
    session: Session,
    poller: StatusPoller,
    aggregator: LogAggregator,
    /// Weak so the loop ends once every handle and in-flight task is gone.
    cmd_tx: WeakUnboundedSender<Command>,
    attempt: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl Controller {
    async fn run(mut self, mut cmd_rx: UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Trigger {
                    git_ref,
                    parameters,
                } => self.on_trigger(git_ref, parameters),
                Command::Started {
                    attempt,
                    git_ref,
                    parameters,
                    result,
                } => self.on_started(attempt, git_ref, parameters, result),
                Command::Poll { run_id, event } => self.on_poll(run_id, event),
                Command::Collected { run_id, result } => self.on_collected(run_id, result),
                Command::Shutdown => break,
            }
        }

        self.poller.stop();
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        tracing::info!("orchestrator stopped");
    }

    fn publish(&self) {
        self.store.publish(self.session.clone());
    }

    fn on_trigger(&mut self, git_ref: String, parameters: Vec<Parameter>) {
        // The previous run's timer must be dead before the new session is visible.
        if self.poller.is_active() {
            tracing::debug!("superseding the run being polled");
        }
        self.poller.stop();
        self.attempt += 1;
        self.session = Session {
            phase: Phase::Triggering,
            ..Session::default()
        };
        self.publish();
        tracing::info!(git_ref = %git_ref, parameters = parameters.len(), "triggering run");

        let Some(tx) = self.cmd_tx.upgrade() else {
            return;
        };
        let client = self.client.clone();
        let attempt = self.attempt;
        self.in_flight = Some(tokio::spawn(async move {
            let result = client.start_run(&git_ref, &parameters).await;
            let _ = tx.send(Command::Started {
                attempt,
                git_ref,
                parameters,
                result,
            });
        }));
    }

    fn on_started(
        &mut self,
        attempt: u64,
        git_ref: String,
        parameters: Vec<Parameter>,
        result: RemoteResult<StartedRun>,
    ) {
        if attempt != self.attempt || self.session.phase != Phase::Triggering {
            tracing::debug!(attempt, current = self.attempt, "discarding superseded start result");
            return;
        }

        match result {
            Ok(started) => {
                tracing::info!(run_id = %started.id, status = ?started.status, "run started");
                let run_id = started.id.clone();
                self.session.active_run = Some(Run {
                    id: started.id,
                    git_ref,
                    parameters,
                    status: started.status,
                    triggered_at: now_rfc3339(),
                });
                self.session.phase = Phase::Polling;
                self.publish();
                self.start_polling(run_id);
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to start run");
                self.session.phase = Phase::Error;
                self.session.active_run = None;
                self.session.last_error = Some(format!("failed to start run: {err}"));
                self.publish();
            }
        }
    }

    fn start_polling(&mut self, run_id: RunId) {
        let tx = self.cmd_tx.clone();
        let sink_run = run_id.clone();
        let sink: PollSink = Arc::new(move |event: PollEvent| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Poll {
                    run_id: sink_run.clone(),
                    event,
                });
            }
        });
        self.poller.start(run_id, self.config.poll_interval, sink);
    }

    /// The run this session is tracking, if it is `run_id` and the session is in `phase`.
    fn is_current(&self, run_id: &RunId, phase: Phase) -> bool {
        self.session.phase == phase
            && self
                .session
                .active_run
                .as_ref()
                .is_some_and(|run| &run.id == run_id)
    }

    fn on_poll(&mut self, run_id: RunId, event: PollEvent) {
        if !self.is_current(&run_id, Phase::Polling) {
            tracing::debug!(run_id = %run_id, ?event, "discarding stale poll event");
            return;
        }

        match event {
            PollEvent::Update(status) => {
                self.advance_run(status);
                self.publish();
            }
            PollEvent::Terminal(status) => {
                self.advance_run(status);
                self.poller.stop();
                self.session.phase = Phase::Aggregating;
                self.publish();
                tracing::info!(run_id = %run_id, status = %status, "run finished, collecting job logs");
                self.start_collecting(run_id);
            }
            PollEvent::Failed(err) => {
                self.poller.stop();
                tracing::error!(run_id = %run_id, error = %err, "status poll failed");
                self.session.last_error = Some(format!("failed to poll run {run_id}: {err}"));
                self.session.active_run = None;
                self.session.phase = Phase::Error;
                self.publish();
            }
        }
    }

    fn advance_run(&mut self, status: RunStatus) {
        if let Some(run) = self.session.active_run.as_mut() {
            if !run.advance(status) && run.status != Some(status) {
                tracing::debug!(run_id = %run.id, observed = %status, current = ?run.status, "ignoring status regression");
            }
        }
    }

    fn start_collecting(&mut self, run_id: RunId) {
        let Some(tx) = self.cmd_tx.upgrade() else {
            return;
        };
        let aggregator = self.aggregator.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = aggregator.collect(&run_id).await;
            let _ = tx.send(Command::Collected { run_id, result });
        }));
    }

    fn on_collected(&mut self, run_id: RunId, result: RemoteResult<Vec<Job>>) {
        if !self.is_current(&run_id, Phase::Aggregating) {
            tracing::debug!(run_id = %run_id, "discarding collection for superseded run");
            return;
        }

        match result {
            Ok(jobs) => {
                self.session.jobs = jobs;
                if self.session.run_status() == Some(RunStatus::Success) {
                    self.session.artifacts_url = self.config.artifacts_url(&run_id);
                }
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "failed to list jobs");
                self.session.jobs = Vec::new();
                self.session.last_error = Some(format!("failed to collect job logs: {err}"));
            }
        }
        self.session.phase = Phase::Done;
        self.publish();
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

//! Fixed-cadence status polling for a single run.

use crate::client::RunClient;
use crate::error::RemoteError;
use crate::model::{RunId, RunStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What the poller reports back, in observation order.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A non-terminal status; repeats are reported too.
    Update(RunStatus),
    /// Delivered exactly once, after which the poller stops.
    Terminal(RunStatus),
    /// Fetch failure; the poller stops without retrying.
    Failed(RemoteError),
}

pub type PollSink = Arc<dyn Fn(PollEvent) + Send + Sync>;

/// Shortest period the timer accepts; tokio panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct ActivePoll {
    run_id: RunId,
    /// Set under the lock by `stop`; checked under the same lock before every delivery.
    stopped: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
}

/// Owns at most one repeating status timer.
///
/// The sink is called from the poller task while an internal lock is held, so
/// it must not call back into `stop`/`start`; forwarding into a channel is the
/// intended use.
pub struct StatusPoller {
    client: Arc<dyn RunClient>,
    active: Option<ActivePoll>,
}

impl StatusPoller {
    pub fn new(client: Arc<dyn RunClient>) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Start polling `run_id` every `interval`, first tick one interval from now.
    /// Any poll already running is stopped first. A zero interval is raised to 1ms.
    pub fn start(&mut self, run_id: RunId, interval: Duration, sink: PollSink) {
        self.stop();
        let interval = interval.max(MIN_INTERVAL);

        let stopped = Arc::new(Mutex::new(false));
        let handle = tokio::spawn(poll_loop(
            self.client.clone(),
            run_id.clone(),
            interval,
            stopped.clone(),
            sink,
        ));
        tracing::debug!(run_id = %run_id, ?interval, "status poller started");
        self.active = Some(ActivePoll {
            run_id,
            stopped,
            handle,
        });
    }

    /// Cancel the pending tick. Idempotent; once this returns the sink is never called again.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // Waits for an in-flight delivery to finish.
        *active.stopped.lock() = true;
        active.handle.abort();
        tracing::debug!(run_id = %active.run_id, "status poller stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    client: Arc<dyn RunClient>,
    run_id: RunId,
    interval: Duration,
    stopped: Arc<Mutex<bool>>,
    sink: PollSink,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let event = match client.get_run_status(&run_id).await {
            Ok(status) if status.is_terminal() => PollEvent::Terminal(status),
            Ok(status) => PollEvent::Update(status),
            Err(err) => PollEvent::Failed(err),
        };
        tracing::debug!(run_id = %run_id, ?event, "poll tick");
        let last = !matches!(event, PollEvent::Update(_));
        if !deliver(&stopped, &sink, event) || last {
            return;
        }
    }
}

fn deliver(stopped: &Mutex<bool>, sink: &PollSink, event: PollEvent) -> bool {
    let stopped = stopped.lock();
    if *stopped {
        return false;
    }
    sink(event);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeRunClient;

    const INTERVAL: Duration = Duration::from_millis(5000);

    fn recording_sink() -> (PollSink, Arc<Mutex<Vec<PollEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: PollSink = Arc::new(move |event: PollEvent| sink_events.lock().push(event));
        (sink, events)
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let client = FakeRunClient::new();
        client.script_statuses(42, vec![Ok(RunStatus::Running)]);
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.start(RunId::from(42), INTERVAL, sink);
        tokio::time::sleep(INTERVAL - Duration::from_millis(1)).await;
        assert_eq!(client.status_calls(), 0);
        assert!(events.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(client.status_calls(), 1);
        assert_eq!(*events.lock(), vec![PollEvent::Update(RunStatus::Running)]);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn reports_repeats_and_terminal_once() {
        let client = FakeRunClient::new();
        client.script_statuses(
            42,
            vec![
                Ok(RunStatus::Pending),
                Ok(RunStatus::Running),
                Ok(RunStatus::Running),
                Ok(RunStatus::Success),
            ],
        );
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.start(RunId::from(42), INTERVAL, sink);
        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(
            *events.lock(),
            vec![
                PollEvent::Update(RunStatus::Pending),
                PollEvent::Update(RunStatus::Running),
                PollEvent::Update(RunStatus::Running),
                PollEvent::Terminal(RunStatus::Success),
            ]
        );
        assert_eq!(client.status_calls(), 4);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn no_callbacks_after_stop() {
        let client = FakeRunClient::new();
        client.script_statuses(42, vec![Ok(RunStatus::Running)]);
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.start(RunId::from(42), INTERVAL, sink);
        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(10)).await;
        assert_eq!(events.lock().len(), 3);

        poller.stop();
        let calls_at_stop = client.status_calls();
        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(events.lock().len(), 3);
        assert_eq!(client.status_calls(), calls_at_stop);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let client = FakeRunClient::new();
        client.script_statuses(42, vec![Ok(RunStatus::Running)]);
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.stop();
        poller.start(RunId::from(42), INTERVAL, sink);
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        poller.stop();
        poller.stop();
        tokio::time::sleep(INTERVAL * 5).await;

        assert_eq!(events.lock().len(), 1);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_stops_polling() {
        let client = FakeRunClient::new();
        client.script_statuses(
            42,
            vec![
                Ok(RunStatus::Running),
                Err(RemoteError::transport("connection reset")),
                Ok(RunStatus::Success),
            ],
        );
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.start(RunId::from(42), INTERVAL, sink);
        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(
            *events.lock(),
            vec![
                PollEvent::Update(RunStatus::Running),
                PollEvent::Failed(RemoteError::transport("connection reset")),
            ]
        );
        assert_eq!(client.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_ticks() {
        let client = FakeRunClient::new();
        client.script_statuses(42, vec![Ok(RunStatus::Running), Ok(RunStatus::Success)]);
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (sink, events) = recording_sink();

        poller.start(RunId::from(42), Duration::ZERO, sink);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *events.lock(),
            vec![
                PollEvent::Update(RunStatus::Running),
                PollEvent::Terminal(RunStatus::Success),
            ]
        );
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_previous_timer() {
        let client = FakeRunClient::new();
        client.script_statuses(1, vec![Ok(RunStatus::Running)]);
        client.script_statuses(2, vec![Ok(RunStatus::Pending)]);
        let mut poller = StatusPoller::new(Arc::new(client.clone()));
        let (first_sink, first_events) = recording_sink();
        let (second_sink, second_events) = recording_sink();

        poller.start(RunId::from(1), INTERVAL, first_sink);
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
        poller.start(RunId::from(2), INTERVAL, second_sink);
        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(10)).await;
        poller.stop();

        assert_eq!(first_events.lock().len(), 1);
        assert_eq!(
            *second_events.lock(),
            vec![
                PollEvent::Update(RunStatus::Pending),
                PollEvent::Update(RunStatus::Pending)
            ]
        );
    }
}

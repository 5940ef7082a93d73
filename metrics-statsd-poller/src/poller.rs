use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::{
    client::StatsdClient,
    config::{sanitize_poll_interval, DEFAULT_POLL_INTERVAL},
    source::HostMetricsProvider,
    telemetry::Telemetry,
};

/// Errors that could occur while starting the poller.
#[derive(Debug, Error)]
pub enum StartError {
    /// Failed to spawn the background thread.
    #[error("failed to spawn background thread for metrics poller: {0}")]
    Spawn(#[source] io::Error),
}

/// Lifecycle of the poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    /// Built, but the poll loop hasn't started yet.
    Created,

    /// The poll loop is sampling and sending.
    Running,

    /// Stop was requested, and the poll loop hasn't exited yet.
    ShuttingDown,

    /// The poll loop has exited. This is final.
    Terminated,
}

// Everything the poll loop and `stop` share, behind one lock.
struct Shared {
    client: Option<StatsdClient>,
    stop_requested: bool,
    state: PollerState,
}

struct Inner {
    shared: Mutex<Shared>,
    cycles: AtomicU64,
}

/// Samples counters from a [`HostMetricsProvider`] at a fixed interval, and sends each one as a gauge.
pub struct MetricsPoller {
    client: Option<StatsdClient>,
    provider: Box<dyn HostMetricsProvider>,
    poll_interval: Duration,
    telemetry: bool,
}

impl MetricsPoller {
    /// Creates a new `MetricsPoller`.
    ///
    /// Without a client, the poller still runs to completion, but never samples or sends anything. This is the case
    /// when the client failed to initialize.
    pub fn new<P>(client: Option<StatsdClient>, provider: P) -> Self
    where
        P: HostMetricsProvider + 'static,
    {
        MetricsPoller {
            client,
            provider: Box::new(provider),
            poll_interval: DEFAULT_POLL_INTERVAL,
            telemetry: true,
        }
    }

    /// Sets the interval between polls.
    ///
    /// A zero interval is replaced by the default.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = sanitize_poll_interval(poll_interval);
        self
    }

    /// Sets whether or not the client's telemetry is forwarded through the `metrics` facade after each poll.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Spawns the poll loop on a dedicated background thread.
    ///
    /// The first poll happens immediately.
    ///
    /// # Errors
    ///
    /// If the background thread can't be spawned, an error is returned.
    pub fn spawn(mut self) -> Result<PollerHandle, StartError> {
        if self.client.is_none() {
            warn!("No statsd client available, metrics poller will not send anything.");
        }

        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                client: self.client.take(),
                stop_requested: false,
                state: PollerState::Created,
            }),
            cycles: AtomicU64::new(0),
        });
        let (stop_tx, stop_rx) = bounded(1);

        let thread_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("metrics-statsd-poller".to_string())
            .spawn(move || self.run(&thread_inner, &stop_rx))
            .map_err(StartError::Spawn)?;

        Ok(PollerHandle { inner, stop_tx, thread: Mutex::new(Some(thread)) })
    }

    fn run(self, inner: &Inner, stop_rx: &Receiver<()>) {
        {
            let mut shared = inner.shared.lock();
            if shared.state == PollerState::Created {
                shared.state = PollerState::Running;
            }
        }
        debug!(poll_interval = ?self.poll_interval, "Metrics poller running.");

        let ticker = tick(self.poll_interval);
        let mut telemetry = None;
        while self.poll(inner, &mut telemetry) {
            // Wait for the next tick, or wake early if we're asked to stop.
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {},
            }
        }

        inner.shared.lock().state = PollerState::Terminated;
        debug!("Metrics poller is done.");
    }

    /// Runs a single poll cycle.
    ///
    /// Returns `false`, without sampling anything, if a stop has been requested.
    fn poll(&self, inner: &Inner, telemetry: &mut Option<Telemetry>) -> bool {
        // The lock is held for the whole cycle, so a stop can't finalize the client halfway through.
        let mut shared = inner.shared.lock();
        if shared.stop_requested {
            return false;
        }

        inner.cycles.fetch_add(1, Ordering::AcqRel);

        let Some(client) = shared.client.as_mut() else {
            return true;
        };

        trace!("Polling for metrics.");

        let sample = self.provider.sample_counters();
        let mut counters_sent = 0;
        let mut counters_skipped = 0;
        for (name, value) in sample.iter() {
            match value {
                Ok(value) => {
                    client.gauge(name, *value);
                    counters_sent += 1;
                }
                Err(e) => {
                    debug!(counter = name, error = %e, "Counter source unavailable, skipping.");
                    counters_skipped += 1;
                }
            }
        }

        trace!(counters_sent, counters_skipped, "Finished polling for metrics.");

        if self.telemetry && client.telemetry().had_updates() {
            let telemetry = telemetry.get_or_insert_with(|| Telemetry::new("udp"));
            telemetry.apply_update(client.telemetry());
        }
        client.telemetry_mut().clear();

        true
    }
}

/// A handle to a running [`MetricsPoller`].
///
/// Dropping the handle stops the poller.
pub struct PollerHandle {
    inner: Arc<Inner>,
    stop_tx: Sender<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PollerHandle {
    /// Returns the current state of the poller.
    pub fn state(&self) -> PollerState {
        self.inner.shared.lock().state
    }

    /// Returns the number of poll cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Acquire)
    }

    /// Stops the poller, and waits for the background thread to exit.
    ///
    /// If a poll is in progress, it's allowed to finish first. Once this returns, nothing more is sent. A pending wait
    /// for the next poll is interrupted, so this never waits out the poll interval.
    ///
    /// Calling this more than once has no further effect.
    pub fn stop(&self) {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.stop_requested {
                debug!("Stopping metrics poller.");

                shared.stop_requested = true;
                if shared.state != PollerState::Terminated {
                    shared.state = PollerState::ShuttingDown;
                }
                if let Some(client) = shared.client.as_mut() {
                    client.finalize();
                }
            }
        }

        // The channel holds a single message, and one is all the poll loop ever needs.
        let _ = self.stop_tx.try_send(());

        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("Metrics poller thread panicked.");
                self.inner.shared.lock().state = PollerState::Terminated;
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        thread::sleep,
        time::{Duration, Instant},
    };

    use super::{MetricsPoller, PollerState};
    use crate::{
        client::{tests::CapturingSink, Connection, StatsdClient},
        source::{CounterSample, HostMetricsProvider, SourceUnavailable},
    };

    const INTERVAL: Duration = Duration::from_millis(20);

    struct CountingProvider {
        samples: Arc<AtomicU64>,
        delay: Duration,
    }

    impl HostMetricsProvider for CountingProvider {
        fn sample_counters(&self) -> CounterSample {
            let n = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                sleep(self.delay);
            }
            let mut sample = CounterSample::new();
            sample.record("cycle", n as i64);
            sample
        }
    }

    fn capturing_client(namespace: Option<&str>) -> (StatsdClient, CapturingSink) {
        let sink = CapturingSink::default();
        let client =
            StatsdClient::with_sink(Connection::new("127.0.0.1", 8125, namespace), sink.clone());
        (client, sink)
    }

    fn wait_until<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn polls_until_stopped() {
        let (client, sink) = capturing_client(Some("fs"));
        let samples = Arc::new(AtomicU64::new(0));
        let provider = CountingProvider { samples: Arc::clone(&samples), delay: Duration::ZERO };

        let handle = MetricsPoller::new(Some(client), provider)
            .with_poll_interval(INTERVAL)
            .with_telemetry(false)
            .spawn()
            .unwrap();

        wait_until(|| handle.cycles() >= 3);
        assert_eq!(handle.state(), PollerState::Running);

        let before_stop = samples.load(Ordering::SeqCst);
        handle.stop();
        let after_stop = samples.load(Ordering::SeqCst);
        assert!(after_stop - before_stop <= 1);
        assert_eq!(handle.state(), PollerState::Terminated);

        let sent = sink.payloads();
        assert_eq!(sent.len() as u64, after_stop);
        assert_eq!(sent[0], "fs.cycle:1|g");

        // Nothing happens once stopped, and stopping again is harmless.
        sleep(INTERVAL * 3);
        handle.stop();
        assert_eq!(samples.load(Ordering::SeqCst), after_stop);
        assert_eq!(sink.payloads().len() as u64, after_stop);
        assert_eq!(handle.cycles(), after_stop);
    }

    #[test]
    fn stop_drains_in_flight_cycle() {
        let (client, sink) = capturing_client(None);
        let samples = Arc::new(AtomicU64::new(0));
        let provider =
            CountingProvider { samples: Arc::clone(&samples), delay: Duration::from_millis(200) };

        let handle = MetricsPoller::new(Some(client), provider)
            .with_poll_interval(Duration::from_secs(3600))
            .spawn()
            .unwrap();

        // Stop while the first cycle is still sampling: it finishes and sends, then the poller exits.
        wait_until(|| samples.load(Ordering::SeqCst) == 1);
        handle.stop();

        assert_eq!(sink.payloads(), vec!["cycle:1|g"]);
        assert_eq!(handle.state(), PollerState::Terminated);
    }

    #[test]
    fn stop_interrupts_pending_wait() {
        let (client, _sink) = capturing_client(None);
        let samples = Arc::new(AtomicU64::new(0));
        let provider = CountingProvider { samples: Arc::clone(&samples), delay: Duration::ZERO };

        let handle = MetricsPoller::new(Some(client), provider)
            .with_poll_interval(Duration::from_secs(3600))
            .spawn()
            .unwrap();

        wait_until(|| handle.cycles() == 1);

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(samples.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_counters_are_skipped() {
        let (client, sink) = capturing_client(Some("fs"));
        let provider = || {
            let mut sample = CounterSample::new();
            sample.record("sessions_count", 5);
            sample.mark_unavailable("call_count", SourceUnavailable::new("database", "down"));
            sample.mark_unavailable("channel_count", SourceUnavailable::new("database", "down"));
            sample.mark_unavailable("registration_count", SourceUnavailable::new("database", "down"));
            sample.record("sessions_count_peak", 8);
            sample
        };

        let handle = MetricsPoller::new(Some(client), provider)
            .with_poll_interval(Duration::from_secs(3600))
            .spawn()
            .unwrap();
        wait_until(|| handle.cycles() == 1);
        handle.stop();

        assert_eq!(sink.payloads(), vec!["fs.sessions_count:5|g", "fs.sessions_count_peak:8|g"]);
    }

    #[test]
    fn runs_without_client() {
        let samples = Arc::new(AtomicU64::new(0));
        let provider = CountingProvider { samples: Arc::clone(&samples), delay: Duration::ZERO };

        let handle = MetricsPoller::new(None, provider).with_poll_interval(INTERVAL).spawn().unwrap();
        wait_until(|| handle.cycles() >= 2);
        handle.stop();

        assert_eq!(samples.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), PollerState::Terminated);
    }

    #[test]
    fn zero_interval_does_not_spin() {
        let (client, sink) = capturing_client(None);
        let samples = Arc::new(AtomicU64::new(0));
        let provider = CountingProvider { samples: Arc::clone(&samples), delay: Duration::ZERO };

        let handle = MetricsPoller::new(Some(client), provider)
            .with_poll_interval(Duration::ZERO)
            .spawn()
            .unwrap();
        sleep(Duration::from_millis(100));
        handle.stop();

        // The zero interval falls back to 1s, so only the immediate first poll runs.
        assert_eq!(handle.cycles(), 1);
        assert_eq!(sink.payloads(), vec!["cycle:1|g"]);
    }

    #[test]
    fn drop_stops_poller() {
        let (client, sink) = capturing_client(None);
        let samples = Arc::new(AtomicU64::new(0));
        let provider = CountingProvider { samples: Arc::clone(&samples), delay: Duration::ZERO };

        let handle =
            MetricsPoller::new(Some(client), provider).with_poll_interval(INTERVAL).spawn().unwrap();
        wait_until(|| handle.cycles() >= 1);
        drop(handle);

        let sent = sink.payloads().len();
        sleep(INTERVAL * 3);
        assert_eq!(sink.payloads().len(), sent);
    }
}

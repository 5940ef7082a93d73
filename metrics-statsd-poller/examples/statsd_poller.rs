use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread::sleep,
    time::Duration,
};

use metrics_statsd_poller::{
    source::{CounterStore, HostCounters, SessionStats},
    Config, StatsdModule,
};

#[derive(Default)]
struct FakeSessions {
    created: AtomicU64,
}

impl SessionStats for FakeSessions {
    fn next_session_id(&self) -> u64 {
        // Pretend a new session shows up every time we're asked.
        self.created.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn session_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed) % 7
    }

    fn sessions_peak(&self) -> u64 {
        6
    }

    fn last_sessions_per_second(&self) -> u64 {
        1
    }

    fn sessions_per_second_peak(&self) -> u64 {
        1
    }

    fn sessions_peak_five_minutes(&self) -> u64 {
        self.session_count()
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).init();

    let config = Config::from_params([("host", "localhost"), ("port", "9125"), ("namespace", "demo")]);

    // No store here, so the call, channel, and registration counts are skipped every cycle.
    let provider = HostCounters::new(
        FakeSessions::default(),
        None::<Box<dyn CounterStore>>,
        "localhost",
    );
    let module = StatsdModule::start(config, provider).expect("failed to start statsd poller");

    sleep(Duration::from_secs(10));
    module.stop();
}

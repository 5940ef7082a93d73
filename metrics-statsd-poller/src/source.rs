//! Sources of the counters sampled on every poll.

use indexmap::IndexMap;
use thiserror::Error;

/// Total sessions created since startup.
pub const SESSIONS_SINCE_STARTUP: &str = "sessions_since_startup";
/// Sessions currently active.
pub const SESSIONS_COUNT: &str = "sessions_count";
/// Peak of concurrently active sessions.
pub const SESSIONS_COUNT_PEAK: &str = "sessions_count_peak";
/// Sessions created during the last second.
pub const SESSIONS_PER_SECOND: &str = "sessions_per_second";
/// Peak of sessions created per second.
pub const SESSIONS_PER_SECOND_PEAK: &str = "sessions_per_second_peak";
/// Peak of sessions over the last five minutes.
pub const SESSIONS_PER_SECOND_5MIN: &str = "sessions_per_second_5min";
/// Calls recorded in the store for the local host.
pub const CALL_COUNT: &str = "call_count";
/// Channels recorded in the store for the local host.
pub const CHANNEL_COUNT: &str = "channel_count";
/// Registrations recorded in the store for the local host.
pub const REGISTRATION_COUNT: &str = "registration_count";

/// A data source that could not be reached.
///
/// Counters backed by an unavailable source are skipped for the cycle; this is never fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{source_name} unavailable: {reason}")]
pub struct SourceUnavailable {
    source_name: String,
    reason: String,
}

impl SourceUnavailable {
    /// Creates a new `SourceUnavailable` for the named source.
    pub fn new<S: Into<String>, R: Into<String>>(source_name: S, reason: R) -> Self {
        Self { source_name: source_name.into(), reason: reason.into() }
    }

    /// Returns the name of the unavailable source.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

/// The counters gathered during one poll, in the order they were recorded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterSample {
    counters: IndexMap<String, Result<i64, SourceUnavailable>>,
}

impl CounterSample {
    /// Creates an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value of a counter.
    pub fn record<N: Into<String>>(&mut self, name: N, value: i64) {
        self.counters.insert(name.into(), Ok(value));
    }

    /// Records that a counter's source couldn't be reached.
    pub fn mark_unavailable<N: Into<String>>(&mut self, name: N, error: SourceUnavailable) {
        self.counters.insert(name.into(), Err(error));
    }

    /// Returns the value of a counter, if it was recorded and available.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.counters.get(name).and_then(|value| value.as_ref().ok().copied())
    }

    /// Returns the number of counters in the sample, available or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterates over the counters in the order they were recorded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<i64, SourceUnavailable>)> {
        self.counters.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<N: Into<String>> FromIterator<(N, i64)> for CounterSample {
    fn from_iter<I: IntoIterator<Item = (N, i64)>>(iter: I) -> Self {
        let mut sample = Self::new();
        for (name, value) in iter {
            sample.record(name, value);
        }
        sample
    }
}

/// Supplies the counters sampled on every poll.
pub trait HostMetricsProvider: Send + Sync {
    /// Samples the current value of every counter this provider knows about.
    ///
    /// Counters whose source is unreachable should be marked as such rather than left out, so the gap is logged.
    fn sample_counters(&self) -> CounterSample;
}

impl<F> HostMetricsProvider for F
where
    F: Fn() -> CounterSample + Send + Sync,
{
    fn sample_counters(&self) -> CounterSample {
        self()
    }
}

/// Session statistics kept by the host.
pub trait SessionStats: Send + Sync {
    /// Identifier that will be given to the next session. Identifiers start at 1.
    fn next_session_id(&self) -> u64;

    /// Number of sessions currently active.
    fn session_count(&self) -> u64;

    /// Highest number of concurrently active sessions.
    fn sessions_peak(&self) -> u64;

    /// Sessions created during the last second.
    fn last_sessions_per_second(&self) -> u64;

    /// Highest number of sessions created in any one second.
    fn sessions_per_second_peak(&self) -> u64;

    /// Highest number of concurrently active sessions during the last five minutes.
    fn sessions_peak_five_minutes(&self) -> u64;
}

/// Tables counted per host in the persistent store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreTable {
    /// Bridged calls.
    BasicCalls,

    /// Channels.
    Channels,

    /// Endpoint registrations.
    Registrations,
}

impl StoreTable {
    /// Returns the name of the table.
    pub const fn as_str(self) -> &'static str {
        match self {
            StoreTable::BasicCalls => "basic_calls",
            StoreTable::Channels => "channels",
            StoreTable::Registrations => "registrations",
        }
    }

    const fn counter_name(self) -> &'static str {
        match self {
            StoreTable::BasicCalls => CALL_COUNT,
            StoreTable::Channels => CHANNEL_COUNT,
            StoreTable::Registrations => REGISTRATION_COUNT,
        }
    }
}

/// A handle on the persistent store, held for the duration of one sample.
pub trait StoreHandle {
    /// Counts the rows of `table` that belong to `hostname`.
    ///
    /// # Errors
    ///
    /// If the query fails, an error is returned and only this counter is skipped.
    fn count_rows(&mut self, table: StoreTable, hostname: &str) -> Result<u64, SourceUnavailable>;
}

/// The persistent store holding per-host call, channel, and registration records.
pub trait CounterStore: Send + Sync {
    /// Opens a handle on the store.
    ///
    /// # Errors
    ///
    /// If the store can't be reached, an error is returned and every store-backed counter is skipped.
    fn open(&self) -> Result<Box<dyn StoreHandle + '_>, SourceUnavailable>;
}

impl<T> CounterStore for Box<T>
where
    T: CounterStore + ?Sized,
{
    fn open(&self) -> Result<Box<dyn StoreHandle + '_>, SourceUnavailable> {
        (**self).open()
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// The standard provider: session statistics, plus per-host counts from the store when one is available.
pub struct HostCounters<S, D> {
    sessions: S,
    store: Option<D>,
    hostname: String,
}

impl<S, D> HostCounters<S, D>
where
    S: SessionStats,
    D: CounterStore,
{
    /// Creates a provider scoped to the local host identity `hostname`.
    pub fn new<H: Into<String>>(sessions: S, store: Option<D>, hostname: H) -> Self {
        Self { sessions, store, hostname: hostname.into() }
    }
}

impl<S, D> HostMetricsProvider for HostCounters<S, D>
where
    S: SessionStats,
    D: CounterStore,
{
    fn sample_counters(&self) -> CounterSample {
        let sessions = &self.sessions;
        let mut sample = CounterSample::new();

        sample.record(
            SESSIONS_SINCE_STARTUP,
            saturating_i64(sessions.next_session_id().saturating_sub(1)),
        );
        sample.record(SESSIONS_COUNT, saturating_i64(sessions.session_count()));
        sample.record(SESSIONS_COUNT_PEAK, saturating_i64(sessions.sessions_peak()));
        sample.record(SESSIONS_PER_SECOND, saturating_i64(sessions.last_sessions_per_second()));
        sample.record(SESSIONS_PER_SECOND_PEAK, saturating_i64(sessions.sessions_per_second_peak()));
        sample.record(SESSIONS_PER_SECOND_5MIN, saturating_i64(sessions.sessions_peak_five_minutes()));

        let tables = [StoreTable::BasicCalls, StoreTable::Channels, StoreTable::Registrations];
        let handle = match &self.store {
            Some(store) => store.open(),
            None => Err(SourceUnavailable::new("database", "no store configured")),
        };

        match handle {
            Ok(mut handle) => {
                for table in tables {
                    match handle.count_rows(table, &self.hostname) {
                        Ok(count) => sample.record(table.counter_name(), saturating_i64(count)),
                        Err(e) => sample.mark_unavailable(table.counter_name(), e),
                    }
                }
            }
            Err(e) => {
                for table in tables {
                    sample.mark_unavailable(table.counter_name(), e.clone());
                }
            }
        }

        sample
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) struct FixedSessions;

    impl SessionStats for FixedSessions {
        fn next_session_id(&self) -> u64 {
            43
        }
        fn session_count(&self) -> u64 {
            5
        }
        fn sessions_peak(&self) -> u64 {
            17
        }
        fn last_sessions_per_second(&self) -> u64 {
            2
        }
        fn sessions_per_second_peak(&self) -> u64 {
            9
        }
        fn sessions_peak_five_minutes(&self) -> u64 {
            11
        }
    }

    pub(crate) struct MapStore {
        pub(crate) rows: HashMap<(&'static str, &'static str), u64>,
        pub(crate) reachable: bool,
    }

    struct MapHandle<'a>(&'a MapStore);

    impl StoreHandle for MapHandle<'_> {
        fn count_rows(&mut self, table: StoreTable, hostname: &str) -> Result<u64, SourceUnavailable> {
            if table == StoreTable::Registrations {
                return Err(SourceUnavailable::new("registrations", "table locked"));
            }

            Ok(self
                .0
                .rows
                .iter()
                .filter(|((t, h), _)| *t == table.as_str() && *h == hostname)
                .map(|(_, count)| *count)
                .sum())
        }
    }

    impl CounterStore for MapStore {
        fn open(&self) -> Result<Box<dyn StoreHandle + '_>, SourceUnavailable> {
            if self.reachable {
                Ok(Box::new(MapHandle(self)))
            } else {
                Err(SourceUnavailable::new("database", "connection refused"))
            }
        }
    }

    fn store(reachable: bool) -> MapStore {
        let rows = HashMap::from([
            (("basic_calls", "switch1"), 3),
            (("basic_calls", "switch2"), 100),
            (("channels", "switch1"), 6),
        ]);
        MapStore { rows, reachable }
    }

    #[test]
    fn session_counters_in_order() {
        let provider = HostCounters::new(FixedSessions, None::<MapStore>, "switch1");
        let sample = provider.sample_counters();

        let available = sample
            .iter()
            .filter_map(|(name, value)| value.as_ref().ok().map(|v| (name, *v)))
            .collect::<Vec<_>>();
        assert_eq!(
            available,
            vec![
                (SESSIONS_SINCE_STARTUP, 42),
                (SESSIONS_COUNT, 5),
                (SESSIONS_COUNT_PEAK, 17),
                (SESSIONS_PER_SECOND, 2),
                (SESSIONS_PER_SECOND_PEAK, 9),
                (SESSIONS_PER_SECOND_5MIN, 11),
            ]
        );
    }

    #[test]
    fn missing_store_marks_store_counters_unavailable() {
        for provider in [
            HostCounters::new(FixedSessions, None, "switch1"),
            HostCounters::new(FixedSessions, Some(store(false)), "switch1"),
        ] {
            let sample = provider.sample_counters();
            assert_eq!(sample.len(), 9);
            for name in [CALL_COUNT, CHANNEL_COUNT, REGISTRATION_COUNT] {
                assert_eq!(sample.get(name), None);
            }
            assert_eq!(sample.get(SESSIONS_COUNT), Some(5));
        }
    }

    #[test]
    fn store_counts_are_scoped_to_hostname() {
        let provider = HostCounters::new(FixedSessions, Some(store(true)), "switch1");
        let sample = provider.sample_counters();

        assert_eq!(sample.get(CALL_COUNT), Some(3));
        assert_eq!(sample.get(CHANNEL_COUNT), Some(6));

        // A failing query only skips its own counter.
        assert_eq!(sample.get(REGISTRATION_COUNT), None);
        assert_eq!(sample.len(), 9);
    }

    #[test]
    fn sessions_since_startup_saturates() {
        struct NoSessions;

        impl SessionStats for NoSessions {
            fn next_session_id(&self) -> u64 {
                0
            }
            fn session_count(&self) -> u64 {
                0
            }
            fn sessions_peak(&self) -> u64 {
                0
            }
            fn last_sessions_per_second(&self) -> u64 {
                0
            }
            fn sessions_per_second_peak(&self) -> u64 {
                0
            }
            fn sessions_peak_five_minutes(&self) -> u64 {
                u64::MAX
            }
        }

        let sample = HostCounters::new(NoSessions, None::<MapStore>, "switch1").sample_counters();
        assert_eq!(sample.get(SESSIONS_SINCE_STARTUP), Some(0));
        assert_eq!(sample.get(SESSIONS_PER_SECOND_5MIN), Some(i64::MAX));
    }

    #[test]
    fn closures_are_providers() {
        let provider = || CounterSample::from_iter([(SESSIONS_COUNT, 5)]);
        let sample = provider.sample_counters();
        assert_eq!(sample.get(SESSIONS_COUNT), Some(5));
        assert_eq!(sample.len(), 1);
    }
}

//! A background poller that periodically samples a host's counters and forwards them to a [statsd][statsd] server.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_statsd_poller::{Config, CounterSample, StatsdModule};
//! // Settings usually come from the host's own configuration, as a list of name/value pairs. Anything missing or
//! // malformed falls back to its default: `127.0.0.1:8125`, with no namespace.
//! let config = Config::from_params([("host", "127.0.0.1"), ("port", "8125"), ("namespace", "fs")]);
//!
//! // Anything implementing `HostMetricsProvider` can be polled, including a plain closure.
//! let module = StatsdModule::start(config, || {
//!     let mut sample = CounterSample::new();
//!     sample.record("sessions_count", 5);
//!     sample
//! })
//! .expect("failed to start poller");
//!
//! // Every second, `fs.sessions_count:5|g` is sent to the statsd server as its own datagram.
//!
//! module.stop();
//! ```
//!
//! # Delivery
//!
//! Metrics are sent over UDP, one metric per datagram, on a connected non-blocking socket. Nothing is acknowledged,
//! retried, batched, or queued: a metric that can't be sent right away is dropped and counted. Instrumentation should
//! never slow down the host it's watching.
//!
//! # Shutdown
//!
//! Stopping the poller lets a poll that is already in progress finish, then ends the loop; nothing is sent afterwards.
//! A stop request wakes the poller immediately rather than waiting out the poll interval.
//!
//! # Telemetry
//!
//! The client counts the metrics it was asked to send and the payloads it sent or dropped. When enabled, these are
//! forwarded after every poll through the [`metrics`] facade, under the `statsd.client` prefix, to whichever recorder
//! the host has installed.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod client;
pub use self::client::{Connection, ConnectionError, StatsdClient, TransmissionError};

mod config;
pub use self::config::{Config, ConfigError};

mod module;
pub use self::module::StatsdModule;

mod poller;
pub use self::poller::{MetricsPoller, PollerHandle, PollerState, StartError};

mod sink;
pub use self::sink::{MetricSink, UdpMetricSink};

pub mod source;
pub use self::source::{CounterSample, HostMetricsProvider, SourceUnavailable};

mod telemetry;
pub use self::telemetry::TelemetryUpdate;

mod writer;
pub use self::writer::{Metric, MetricKind, MetricValue, WriteError};

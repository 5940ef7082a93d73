use std::{fmt, io};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    config::{Config, DEFAULT_MAX_PAYLOAD_LEN},
    sink::{MetricSink, UdpMetricSink},
    telemetry::TelemetryUpdate,
    writer::{Metric, MetricValue, MetricWriter},
};

/// Errors that could occur while initializing a client.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The remote address could not be resolved, or the socket could not be created.
    #[error("failed to set up statsd socket for {host}:{port}: {source}")]
    Socket {
        /// The configured host.
        host: String,

        /// The configured port.
        port: u16,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A payload that the transport refused.
///
/// Transmission errors are never returned to callers: the payload is dropped, logged, and counted.
#[derive(Debug, Error)]
#[error("failed to send {len} byte payload: {source}")]
pub struct TransmissionError {
    len: usize,
    #[source]
    source: io::Error,
}

/// The target of a client: where metrics go, and under which namespace.
///
/// A `Connection` is fixed once the client is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    host: String,
    port: u16,
    namespace: Option<String>,
}

impl Connection {
    /// Creates a new `Connection`. An empty namespace is treated as no namespace.
    pub fn new<H: Into<String>>(host: H, port: u16, namespace: Option<&str>) -> Self {
        Self {
            host: host.into(),
            port,
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        }
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A statsd client.
///
/// Sending is fire-and-forget: every metric is encoded into one line and handed to the transport as one datagram, and
/// any failure along the way drops the metric without reporting an error to the caller, and without retrying.
pub struct StatsdClient {
    connection: Connection,
    sink: Option<Box<dyn MetricSink>>,
    writer: MetricWriter,
    telemetry: TelemetryUpdate,
}

impl StatsdClient {
    /// Creates a client that sends to `host:port` over UDP, without a namespace.
    ///
    /// # Errors
    ///
    /// If the address can't be resolved or the socket can't be created, an error is returned. The server does not need
    /// to be reachable.
    pub fn init(host: &str, port: u16) -> Result<Self, ConnectionError> {
        Self::connect(Connection::new(host, port, None), DEFAULT_MAX_PAYLOAD_LEN)
    }

    /// Creates a client that sends to `host:port` over UDP, prefixing every metric name with `namespace.`.
    ///
    /// # Errors
    ///
    /// If the address can't be resolved or the socket can't be created, an error is returned. The server does not need
    /// to be reachable.
    pub fn init_with_namespace(
        host: &str,
        port: u16,
        namespace: &str,
    ) -> Result<Self, ConnectionError> {
        Self::connect(Connection::new(host, port, Some(namespace)), DEFAULT_MAX_PAYLOAD_LEN)
    }

    /// Creates a client from the given configuration.
    ///
    /// # Errors
    ///
    /// If the address can't be resolved or the socket can't be created, an error is returned.
    pub fn from_config(config: &Config) -> Result<Self, ConnectionError> {
        let connection = Connection::new(config.host(), config.port(), config.namespace());
        Self::connect(connection, config.max_payload_len())
    }

    fn connect(connection: Connection, max_payload_len: usize) -> Result<Self, ConnectionError> {
        let sink = UdpMetricSink::connect(connection.host(), connection.port()).map_err(|source| {
            ConnectionError::Socket {
                host: connection.host().to_string(),
                port: connection.port(),
                source,
            }
        })?;

        match connection.namespace() {
            Some(namespace) => debug!(%connection, namespace, "Sending stats with namespace."),
            None => debug!(%connection, "Sending stats."),
        }

        Ok(Self::with_sink(connection, sink).with_maximum_payload_length(max_payload_len))
    }

    /// Creates a client that hands its payloads to the given sink.
    pub fn with_sink<S>(connection: Connection, sink: S) -> Self
    where
        S: MetricSink + 'static,
    {
        Self {
            connection,
            sink: Some(Box::new(sink)),
            writer: MetricWriter::new(DEFAULT_MAX_PAYLOAD_LEN),
            telemetry: TelemetryUpdate::default(),
        }
    }

    /// Sets the maximum payload length. Metrics longer than this once encoded are dropped.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.writer = MetricWriter::new(max_payload_len);
        self
    }

    /// Returns the connection this client sends to.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns `true` if the client has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.sink.is_none()
    }

    /// Returns the telemetry collected since it was last cleared.
    pub fn telemetry(&self) -> &TelemetryUpdate {
        &self.telemetry
    }

    pub(crate) fn telemetry_mut(&mut self) -> &mut TelemetryUpdate {
        &mut self.telemetry
    }

    /// Sends a gauge.
    pub fn gauge<V: Into<MetricValue>>(&mut self, name: &str, value: V) {
        self.send(&Metric::gauge(name, value));
    }

    /// Sends a counter delta.
    pub fn counter(&mut self, name: &str, delta: i64) {
        self.send(&Metric::counter(name, delta));
    }

    /// Sends a timing, in milliseconds.
    pub fn timing(&mut self, name: &str, milliseconds: u64) {
        self.send(&Metric::timing(name, milliseconds));
    }

    /// Sends an arbitrary metric.
    ///
    /// Does nothing once the client has been finalized.
    pub fn send(&mut self, metric: &Metric<'_>) {
        let Some(sink) = self.sink.as_mut() else {
            trace!(metric_name = metric.name(), "Client is finalized, dropping metric.");
            return;
        };

        self.telemetry.track_metric();

        let payload = match self.writer.write(self.connection.namespace.as_deref(), metric) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(metric_name = metric.name(), error = %e, "Failed to encode metric.");
                self.telemetry.track_packet_serializer_failed();
                return;
            }
        };

        match sink.emit(payload) {
            Ok(_) => self.telemetry.track_packet_send_succeeded(payload.len()),
            Err(source) => {
                let error = TransmissionError { len: payload.len(), source };
                warn!(metric_name = metric.name(), %error, "Failed to send metric.");
                self.telemetry.track_packet_send_failed(payload.len());
            }
        }
    }

    /// Releases the transport. Any metric sent afterwards is dropped.
    ///
    /// Calling this more than once has no further effect.
    pub fn finalize(&mut self) {
        if self.sink.take().is_some() {
            debug!(connection = %self.connection, "Finalized statsd client.");
        }
    }
}

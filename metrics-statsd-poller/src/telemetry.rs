use metrics::{counter, Counter};

/// Client telemetry.
///
/// `Telemetry` forwards the client's own behavior (payloads sent or dropped, and why) as normal metrics through the
/// [`metrics`] facade, to whichever recorder the host has installed.
pub struct Telemetry {
    metrics: Counter,
    packets_sent: Counter,
    packets_dropped: Counter,
    packets_dropped_writer: Counter,
    packets_dropped_serializer: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let labels = telemetry_tags!("client_transport" => transport);

        Self {
            metrics: counter!("statsd.client.metrics", labels.iter()),
            packets_sent: counter!("statsd.client.packets_sent", labels.iter()),
            packets_dropped: counter!("statsd.client.packets_dropped", labels.iter()),
            packets_dropped_writer: counter!("statsd.client.packets_dropped_writer", labels.iter()),
            packets_dropped_serializer: counter!(
                "statsd.client.packets_dropped_serializer",
                labels.iter()
            ),
            bytes_sent: counter!("statsd.client.bytes_sent", labels.iter()),
            bytes_dropped: counter!("statsd.client.bytes_dropped", labels.iter()),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.metrics.increment(update.metrics);
        self.packets_sent.increment(update.packets_sent);
        self.packets_dropped.increment(update.packets_dropped);
        self.packets_dropped_writer.increment(update.packets_dropped_writer);
        self.packets_dropped_serializer.increment(update.packets_dropped_serializer);
        self.bytes_sent.increment(update.bytes_sent);
        self.bytes_dropped.increment(update.bytes_dropped);
    }
}

/// A buffer for collecting telemetry updates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryUpdate {
    metrics: u64,
    packets_sent: u64,
    packets_dropped: u64,
    packets_dropped_writer: u64,
    packets_dropped_serializer: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns `true` if any updates have been recorded.
    pub fn had_updates(&self) -> bool {
        self.metrics > 0
    }

    /// Returns the number of metrics the client was asked to send.
    pub fn metrics(&self) -> u64 {
        self.metrics
    }

    /// Returns the number of payloads handed to the transport.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Returns the number of payloads dropped, for any reason.
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    /// Returns the number of payloads dropped because the transport rejected them.
    pub fn packets_dropped_writer(&self) -> u64 {
        self.packets_dropped_writer
    }

    /// Returns the number of payloads dropped because they could not be encoded.
    pub fn packets_dropped_serializer(&self) -> u64 {
        self.packets_dropped_serializer
    }

    /// Returns the number of bytes handed to the transport.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Tracks a metric handed to the client, whatever becomes of it.
    pub(crate) fn track_metric(&mut self) {
        self.metrics += 1;
    }

    /// Tracks a successful packet send.
    pub(crate) fn track_packet_send_succeeded(&mut self, bytes_len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed packet send.
    pub(crate) fn track_packet_send_failed(&mut self, bytes_len: usize) {
        self.packets_dropped += 1;
        self.packets_dropped_writer += 1;
        self.bytes_dropped += bytes_len as u64;
    }

    /// Tracks a failed packet serialization.
    pub(crate) fn track_packet_serializer_failed(&mut self) {
        self.packets_dropped += 1;
        self.packets_dropped_serializer += 1;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;

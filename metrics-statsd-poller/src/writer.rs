use thiserror::Error;

/// Bytes that carry meaning in the statsd line format and so can't appear in a metric name or namespace.
const RESERVED_BYTES: &[u8] = b":|@\n";

/// The kind of a metric, which selects the type suffix of the encoded line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// An absolute value (`g`). Must not be negative, as a leading sign makes the server apply it as a change.
    Gauge,

    /// A delta to apply to a counter (`c`).
    Counter,

    /// A duration in milliseconds (`ms`).
    Timing,
}

impl MetricKind {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricKind::Gauge => b"|g",
            MetricKind::Counter => b"|c",
            MetricKind::Timing => b"|ms",
        }
    }
}

/// A numeric metric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// A signed integer.
    Integer(i64),

    /// An unsigned integer.
    Unsigned(u64),

    /// A floating point number. Must be finite to be encoded.
    FloatingPoint(f64),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Unsigned(value)
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Unsigned(u64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::FloatingPoint(value)
    }
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::Unsigned(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => self.float_writer.format_finite(v),
        }
    }
}

/// A single metric sample.
///
/// Samples are transient: they're built, encoded into one line, and dropped within a single send.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metric<'a> {
    name: &'a str,
    value: MetricValue,
    kind: MetricKind,
    sample_rate: Option<f64>,
}

impl<'a> Metric<'a> {
    /// Creates a new metric of the given kind.
    pub fn new<V: Into<MetricValue>>(name: &'a str, value: V, kind: MetricKind) -> Self {
        Self { name, value: value.into(), kind, sample_rate: None }
    }

    /// Creates a gauge.
    pub fn gauge<V: Into<MetricValue>>(name: &'a str, value: V) -> Self {
        Self::new(name, value, MetricKind::Gauge)
    }

    /// Creates a counter delta.
    pub fn counter(name: &'a str, delta: i64) -> Self {
        Self::new(name, delta, MetricKind::Counter)
    }

    /// Creates a timing, in milliseconds.
    pub fn timing(name: &'a str, milliseconds: u64) -> Self {
        Self::new(name, milliseconds, MetricKind::Timing)
    }

    /// Attaches a sample rate, which must lie within `(0, 1]`.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Returns the name of the metric.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the value of the metric.
    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// Returns the kind of the metric.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

/// Errors that prevent a metric from being encoded.
#[derive(Debug, Error, PartialEq)]
pub enum WriteError {
    /// The metric name was empty or contained a reserved character.
    #[error("invalid metric name '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The namespace was empty or contained a reserved character.
    #[error("invalid namespace '{namespace}'")]
    InvalidNamespace {
        /// The rejected namespace.
        namespace: String,
    },

    /// The value was NaN or infinite.
    #[error("metric value is not finite")]
    NonFiniteValue,

    /// A gauge value was negative.
    #[error("gauge value is negative")]
    NegativeGauge,

    /// The sample rate fell outside of `(0, 1]`.
    #[error("sample rate {rate} is outside of (0, 1]")]
    InvalidSampleRate {
        /// The rejected sample rate.
        rate: f64,
    },

    /// The encoded line would exceed the maximum payload length.
    #[error("encoded metric is {len} bytes, exceeding the maximum payload length of {max_payload_len} bytes")]
    PayloadTooLarge {
        /// Length of the encoded line.
        len: usize,

        /// Configured maximum payload length.
        max_payload_len: usize,
    },
}

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && !s.bytes().any(|b| RESERVED_BYTES.contains(&b))
}

/// Encodes metrics into statsd lines.
///
/// Every metric is written as its own payload, `<namespace.><name>:<value>|<type>[|@<rate>]`, with no trailing
/// newline, since each payload is sent as a single datagram. The buffer is reused between writes.
pub(crate) struct MetricWriter {
    max_payload_len: usize,
    buf: Vec<u8>,
}

impl MetricWriter {
    /// Creates a new `MetricWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len, buf: Vec::new() }
    }

    /// Encodes `metric`, prefixed by `prefix` if given, and returns the encoded line.
    ///
    /// # Errors
    ///
    /// If the metric can't be represented in the line format, or the line would be longer than the maximum payload
    /// length, an error is returned and nothing is written.
    pub fn write(&mut self, prefix: Option<&str>, metric: &Metric<'_>) -> Result<&[u8], WriteError> {
        self.buf.clear();

        if let Some(prefix) = prefix {
            if !is_valid_identifier(prefix) {
                return Err(WriteError::InvalidNamespace { namespace: prefix.to_string() });
            }
        }

        if !is_valid_identifier(metric.name) {
            return Err(WriteError::InvalidName { name: metric.name.to_string() });
        }

        if let MetricValue::FloatingPoint(v) = metric.value {
            if !v.is_finite() {
                return Err(WriteError::NonFiniteValue);
            }
        }

        if metric.kind == MetricKind::Gauge {
            let negative = match metric.value {
                MetricValue::Integer(v) => v < 0,
                MetricValue::Unsigned(_) => false,
                MetricValue::FloatingPoint(v) => v.is_sign_negative(),
            };
            if negative {
                return Err(WriteError::NegativeGauge);
            }
        }

        // Write the sample rate if it's not 1.0, as that is the implied default.
        let maybe_sample_rate = match metric.sample_rate {
            Some(rate) if rate > 0.0 && rate < 1.0 => Some(rate),
            Some(rate) if rate > 0.0 && rate <= 1.0 => None,
            Some(rate) => return Err(WriteError::InvalidSampleRate { rate }),
            None => None,
        };

        if let Some(prefix) = prefix {
            self.buf.extend_from_slice(prefix.as_bytes());
            self.buf.push(b'.');
        }
        self.buf.extend_from_slice(metric.name.as_bytes());

        let mut formatter = MetricValueFormatter::new();
        self.buf.push(b':');
        self.buf.extend_from_slice(formatter.format(metric.value).as_bytes());
        self.buf.extend_from_slice(metric.kind.as_bytes());

        if let Some(sample_rate) = maybe_sample_rate {
            let mut float_writer = ryu::Buffer::new();
            self.buf.extend_from_slice(b"|@");
            self.buf.extend_from_slice(float_writer.format_finite(sample_rate).as_bytes());
        }

        if self.buf.len() > self.max_payload_len {
            let len = self.buf.len();
            self.buf.clear();
            return Err(WriteError::PayloadTooLarge { len, max_payload_len: self.max_payload_len });
        }

        Ok(&self.buf)
    }
}

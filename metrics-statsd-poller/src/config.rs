use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8125;
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;

/// Problems found in the supplied settings.
///
/// None of these are fatal: the offending setting is replaced by its default, and the problem is logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The host was empty.
    #[error("empty host, using default '127.0.0.1'")]
    EmptyHost,

    /// The port was not an integer within 1-65535.
    #[error("invalid port '{value}', using default 8125")]
    InvalidPort {
        /// The rejected value.
        value: String,
    },

    /// The poll interval was zero.
    #[error("zero poll interval, using default of 1s")]
    ZeroPollInterval,
}

/// Returns `poll_interval`, or the default if it's zero. A zero interval would poll in a busy loop.
pub(crate) fn sanitize_poll_interval(poll_interval: Duration) -> Duration {
    if poll_interval.is_zero() {
        warn!(error = %ConfigError::ZeroPollInterval, "Invalid statsd setting.");
        DEFAULT_POLL_INTERVAL
    } else {
        poll_interval
    }
}

/// Settings for reporting to a statsd server.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    host: String,
    port: u16,
    namespace: Option<String>,
    poll_interval: Duration,
    max_payload_len: usize,
    telemetry: bool,
}

impl Config {
    /// Builds a configuration from a list of `(name, value)` parameters.
    ///
    /// Recognized names are `host`, `port`, and `namespace`, matched case-insensitively. Unknown names are ignored.
    /// Settings that are missing or malformed fall back to their defaults, and each substitution is logged; this never
    /// fails.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (config, errors) = Self::parse_params(params);
        for error in errors {
            warn!(%error, "Invalid statsd setting.");
        }
        config
    }

    fn parse_params<I, K, V>(params: I) -> (Self, Vec<ConfigError>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        for (name, value) in params {
            let (name, value) = (name.as_ref(), value.as_ref());
            if name.eq_ignore_ascii_case("host") {
                if value.is_empty() {
                    errors.push(ConfigError::EmptyHost);
                    config.host = DEFAULT_HOST.to_string();
                } else {
                    config.host = value.to_string();
                }
            } else if name.eq_ignore_ascii_case("port") {
                match value.trim().parse::<u16>() {
                    Ok(port) if port != 0 => config.port = port,
                    _ => {
                        errors.push(ConfigError::InvalidPort { value: value.to_string() });
                        config.port = DEFAULT_PORT;
                    }
                }
            } else if name.eq_ignore_ascii_case("namespace") {
                config.namespace = if value.is_empty() { None } else { Some(value.to_string()) };
            } else {
                debug!(name, "Ignoring unknown statsd setting.");
            }
        }

        (config, errors)
    }

    /// Sets the host of the statsd server.
    ///
    /// An empty host is replaced by the default.
    ///
    /// Defaults to `127.0.0.1`.
    #[must_use]
    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        let host = host.into();
        self.host = if host.is_empty() { DEFAULT_HOST.to_string() } else { host };
        self
    }

    /// Sets the port of the statsd server.
    ///
    /// Port `0` is replaced by the default.
    ///
    /// Defaults to `8125`.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = if port == 0 { DEFAULT_PORT } else { port };
        self
    }

    /// Sets the namespace prepended to every metric name, separated by a `.`.
    ///
    /// An empty namespace is the same as no namespace.
    ///
    /// Defaults to no namespace.
    #[must_use]
    pub fn with_namespace<N: Into<String>>(mut self, namespace: N) -> Self {
        let namespace = namespace.into();
        self.namespace = if namespace.is_empty() { None } else { Some(namespace) };
        self
    }

    /// Sets how often counters are sampled and sent.
    ///
    /// A zero interval is replaced by the default.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = sanitize_poll_interval(poll_interval);
        self
    }

    /// Sets the maximum length of a single payload.
    ///
    /// Metrics whose encoded form is longer than this are dropped.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Sets whether or not the client reports its own telemetry through the `metrics` facade.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the host of the statsd server.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port of the statsd server.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the maximum payload length.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Returns `true` if telemetry is enabled.
    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            namespace: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            telemetry: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, ConfigError};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 8125);
        assert_eq!(config.namespace(), None);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.max_payload_len(), 8192);
        assert!(config.telemetry_enabled());
    }

    #[test]
    fn params_are_case_insensitive() {
        let config =
            Config::from_params([("HOST", "10.0.0.5"), ("Port", "9999"), ("NameSpace", "fs")]);
        assert_eq!(config.host(), "10.0.0.5");
        assert_eq!(config.port(), 9999);
        assert_eq!(config.namespace(), Some("fs"));
    }

    #[test]
    fn malformed_params_fall_back_to_defaults() {
        let cases = [
            (("port", "not a port"), ConfigError::InvalidPort { value: "not a port".to_string() }),
            (("port", "0"), ConfigError::InvalidPort { value: "0".to_string() }),
            (("port", "70000"), ConfigError::InvalidPort { value: "70000".to_string() }),
            (("host", ""), ConfigError::EmptyHost),
        ];

        for (param, expected) in cases {
            let (config, errors) = Config::parse_params([param]);
            assert_eq!(config, Config::default());
            assert_eq!(errors, vec![expected]);
        }
    }

    #[test]
    fn unknown_and_empty_params() {
        let (config, errors) =
            Config::parse_params([("relative_oid", "2000"), ("namespace", "")]);
        assert_eq!(config, Config::default());
        assert!(errors.is_empty());
    }

    #[test]
    fn builder_setters() {
        let config = Config::default()
            .with_host("")
            .with_port(0)
            .with_namespace("fs")
            .with_poll_interval(Duration::from_millis(50))
            .with_maximum_payload_length(512)
            .with_telemetry(false);

        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 8125);
        assert_eq!(config.namespace(), Some("fs"));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.max_payload_len(), 512);
        assert!(!config.telemetry_enabled());

        assert_eq!(Config::default().with_namespace("").namespace(), None);
    }

    #[test]
    fn zero_poll_interval_falls_back_to_default() {
        let config = Config::default().with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}

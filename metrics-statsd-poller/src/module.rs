use tracing::error;

use crate::{
    client::StatsdClient,
    config::Config,
    poller::{MetricsPoller, PollerHandle, StartError},
    source::HostMetricsProvider,
};

/// The start/stop hooks for a host that embeds the poller.
///
/// Starting never fails because of the statsd server: if the client can't be set up, the poller runs without sending
/// anything, so the host carries on regardless.
pub struct StatsdModule {
    config: Config,
    poller: PollerHandle,
}

impl StatsdModule {
    /// Creates the client from `config` and starts polling `provider`.
    ///
    /// # Errors
    ///
    /// If the background thread can't be spawned, an error is returned.
    pub fn start<P>(config: Config, provider: P) -> Result<Self, StartError>
    where
        P: HostMetricsProvider + 'static,
    {
        let client = match StatsdClient::from_config(&config) {
            Ok(client) => Some(client),
            Err(e) => {
                error!(error = %e, "Failed to initialize statsd client, metrics will not be sent.");
                None
            }
        };

        let poller = MetricsPoller::new(client, provider)
            .with_poll_interval(config.poll_interval())
            .with_telemetry(config.telemetry_enabled())
            .spawn()?;

        Ok(Self { config, poller })
    }

    /// Returns the configuration the module was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the handle to the running poller.
    pub fn poller(&self) -> &PollerHandle {
        &self.poller
    }

    /// Stops polling and releases the client. Idempotent.
    pub fn stop(&self) {
        self.poller.stop();
    }
}

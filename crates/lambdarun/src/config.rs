use std::time::Duration;

/// How long a call waits for the device before giving up.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings for one endpoint of the link.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Upper bound on a single call's wait for its result.
    pub call_timeout: Duration,
    /// Endpoint name, attached to every log line of this endpoint.
    pub name: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            name: "connector".into(),
        }
    }
}

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

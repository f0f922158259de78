//! Connection configuration.

use std::time::Duration;

use cdpmux_config::Config;

/// Behaviour of one [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Default deadline for command responses. `None` waits until the
    /// connection closes.
    pub request_timeout: Option<Duration>,
    /// Deadline for the best-effort `Target.detachFromTarget`.
    pub detach_timeout: Duration,
    /// `Host` header sent on the WebSocket upgrade and discovery requests.
    pub host_override: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            detach_timeout: Duration::from_secs(5),
            host_override: None,
        }
    }
}

impl ConnectionConfig {
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }
}

impl From<&Config> for ConnectionConfig {
    fn from(config: &Config) -> Self {
        let request_timeout = match config.connection.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let host_override = &config.browser.host_override;
        Self {
            request_timeout,
            detach_timeout: Duration::from_secs(config.connection.detach_timeout_secs),
            host_override: host_override.enabled.then(|| host_override.host.clone()),
        }
    }
}

//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the remote-debugging endpoint lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// HTTP endpoint used for discovery (`/json/version`, `/json/list`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Browser WebSocket URL. When set, discovery is skipped.
    #[serde(default)]
    pub ws_url: Option<String>,

    #[serde(default)]
    pub host_override: HostOverrideConfig,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            ws_url: None,
            host_override: HostOverrideConfig::default(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:9222".to_string()
}

/// Host override mode.
///
/// Browsers refuse debugger requests whose `Host` header is not an IP or
/// `localhost`. With this enabled the client sends `host` instead of the real
/// host and rewrites the URLs the browser reports back to the real endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostOverrideConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_override_host")]
    pub host: String,
}

impl Default for HostOverrideConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_override_host(),
        }
    }
}

fn default_override_host() -> String {
    "localhost".to_string()
}

/// Per-connection behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Default deadline for a command response. 0 disables the deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deadline for the best-effort detach command.
    #[serde(default = "default_detach_timeout")]
    pub detach_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            detach_timeout_secs: default_detach_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_detach_timeout() -> u64 {
    5
}

/// Logging configuration for binaries embedding the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

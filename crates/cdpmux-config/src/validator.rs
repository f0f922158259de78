//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`], passing warnings through.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_browser(config, &mut result);
        Self::validate_connection(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_browser(config: &Config, result: &mut ValidationResult) {
        let endpoint = &config.browser.endpoint;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            result.add_error(ValidationError::new(
                "browser.endpoint",
                "Endpoint must start with http:// or https://",
            ));
        }

        if let Some(ws_url) = &config.browser.ws_url {
            if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
                result.add_error(ValidationError::new(
                    "browser.ws_url",
                    "WebSocket URL must start with ws:// or wss://",
                ));
            }
        }

        let host_override = &config.browser.host_override;
        if host_override.enabled && host_override.host.trim().is_empty() {
            result.add_error(ValidationError::new(
                "browser.host_override.host",
                "Host cannot be empty when host override is enabled",
            ));
        }
        if host_override.host.contains('/') {
            result.add_error(ValidationError::new(
                "browser.host_override.host",
                "Host must not contain a path",
            ));
        }
    }

    fn validate_connection(config: &Config, result: &mut ValidationResult) {
        if config.connection.request_timeout_secs == 0 {
            result.add_warning(ValidationWarning::new(
                "connection.request_timeout_secs",
                "Request timeout is disabled, a lost response will block its caller until the connection closes",
            ));
        }

        if config.connection.detach_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "connection.detach_timeout_secs",
                "detach_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', it will be treated as a filter directive",
                    config.logging.level
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

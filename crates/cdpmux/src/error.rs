//! CDP error types.

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;
use crate::types::SessionId;

/// CDP client errors.
#[derive(Debug, Error)]
pub enum CdpError {
    /// The browser answered the command with an `error` object.
    #[error("CDP error: {message} (code: {code})")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The connection is gone: closed locally, closed by the peer, or broken.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response within the deadline. The pending entry has been dropped.
    #[error("Request {method} (id {id}) timed out")]
    Timeout { method: String, id: u64 },

    /// The session was detached; it can no longer send commands.
    #[error("Session {0} is detached")]
    SessionDetached(SessionId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request id {0} is already pending")]
    DuplicateRequestId(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// HTTP error (for endpoint discovery).
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Config error: {0}")]
    Config(#[from] cdpmux_config::ConfigError),
}

impl CdpError {
    /// True when the remote process rejected the command.
    pub fn is_protocol(&self) -> bool {
        matches!(self, CdpError::Protocol { .. })
    }

    /// True for errors after which the connection is unusable.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, CdpError::ConnectionClosed)
    }
}

impl From<reqwest::Error> for CdpError {
    fn from(e: reqwest::Error) -> Self {
        CdpError::Http(e.to_string())
    }
}

/// An inbound frame that could not be classified. Never surfaced to callers.
#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has neither a response nor an event shape")]
    Unclassifiable,

    #[error("malformed error body: {0}")]
    MalformedError(String),
}

//! Identifier and event types shared across the crate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque session identifier issued by the browser on attach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Target identifier (page, worker, browser).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Registry key: `None` is the root (browser) session.
pub(crate) type SessionKey = Option<SessionId>;

/// An event pushed by the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    /// `None` for root-session events.
    pub session_id: Option<SessionId>,
}

impl CdpEvent {
    /// Domain part of the method, e.g. `Page` for `Page.loadEventFired`.
    pub fn domain(&self) -> &str {
        self.method
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.method)
    }

    /// Deserialize the params into a typed payload.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.params)
    }
}

/// Events are shared between every listener that receives them.
pub type SharedEvent = Arc<CdpEvent>;

/// Which events a listener wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Exact method name, e.g. `Page.loadEventFired`.
    Method(String),
    /// Whole domain, e.g. `Network`.
    Domain(String),
}

impl EventFilter {
    pub fn method(method: impl Into<String>) -> Self {
        Self::Method(method.into())
    }

    pub fn domain(domain: impl Into<String>) -> Self {
        Self::Domain(domain.into())
    }

    pub fn matches(&self, event: &CdpEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Method(m) => event.method == *m,
            EventFilter::Domain(d) => event.domain() == d,
        }
    }
}

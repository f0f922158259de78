//! URL host rewriting for host override mode.
//!
//! When the client sends a fixed `Host` header (browsers only accept IPs and
//! `localhost` there), the browser builds the URLs it reports from that
//! header. Those URLs point at the wrong place; rewriting puts the real host
//! and port back.

use url::Url;

use crate::error::CdpError;

/// Replace host and port of `reported` with `host`/`port`, keeping scheme,
/// path, query and fragment.
pub fn rewrite_url(reported: &str, host: &str, port: Option<u16>) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(reported)?;
    url.set_host(Some(host))?;
    url.set_port(port)
        .map_err(|_| url::ParseError::SetHostOnCannotBeABaseUrl)?;
    Ok(url)
}

/// Rewrites reported URLs back to the endpoint's real network location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRewriter {
    host: String,
    port: Option<u16>,
    enabled: bool,
}

impl HostRewriter {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            enabled: true,
        }
    }

    /// Rewriter targeting the host and port of `endpoint`.
    pub fn from_endpoint(endpoint: &str) -> Result<Self, CdpError> {
        let url = Url::parse(endpoint)?;
        let host = url
            .host_str()
            .ok_or_else(|| CdpError::InvalidOperation(format!("endpoint has no host: {endpoint}")))?;
        Ok(Self::new(host, url.port()))
    }

    /// Pass URLs through untouched.
    pub fn disabled() -> Self {
        Self {
            host: String::new(),
            port: None,
            enabled: false,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rewrite(&self, reported: &str) -> Result<String, CdpError> {
        if !self.enabled {
            return Ok(reported.to_string());
        }
        Ok(rewrite_url(reported, &self.host, self.port)?.to_string())
    }
}

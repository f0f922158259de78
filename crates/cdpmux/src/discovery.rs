//! HTTP endpoint discovery (`/json/version`, `/json/list`, `/json/new`).

use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::error::CdpError;
use crate::host::HostRewriter;

/// Browser version info.
///
/// Note: Chrome returns PascalCase field names for this endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "V8-Version")]
    pub v8_version: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Target entry from the `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
    pub devtools_frontend_url: Option<String>,
}

/// Client for the browser's bootstrap HTTP API.
pub struct DiscoveryClient {
    http: reqwest::Client,
    endpoint: String,
    host_header: Option<String>,
    rewriter: HostRewriter,
}

impl DiscoveryClient {
    /// `endpoint` is e.g. `http://localhost:9222`. With `host_override` set,
    /// requests carry that `Host` header and reported WebSocket URLs are
    /// rewritten back to the endpoint's host and port.
    pub fn new(endpoint: &str, host_override: Option<String>) -> Result<Self, CdpError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let rewriter = match host_override {
            Some(_) => HostRewriter::from_endpoint(&endpoint)?,
            None => HostRewriter::disabled(),
        };
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            host_header: host_override,
            rewriter,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn rewriter(&self) -> &HostRewriter {
        &self.rewriter
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.endpoint, path);
        debug!("CDP discovery {} {}", method, url);
        let request = self.http.request(method, url);
        match &self.host_header {
            Some(host) => request.header(reqwest::header::HOST, host),
            None => request,
        }
    }

    fn rewrite_target(&self, mut target: TargetDescriptor) -> Result<TargetDescriptor, CdpError> {
        if let Some(ws_url) = &target.web_socket_debugger_url {
            target.web_socket_debugger_url = Some(self.rewriter.rewrite(ws_url)?);
        }
        Ok(target)
    }

    /// Browser version and the root WebSocket URL.
    pub async fn version(&self) -> Result<BrowserVersion, CdpError> {
        let mut version: BrowserVersion = self
            .request(Method::GET, "/json/version")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        version.web_socket_debugger_url = self.rewriter.rewrite(&version.web_socket_debugger_url)?;
        Ok(version)
    }

    /// List all targets.
    pub async fn list_targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
        let targets: Vec<TargetDescriptor> = self
            .request(Method::GET, "/json/list")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        targets
            .into_iter()
            .map(|target| self.rewrite_target(target))
            .collect()
    }

    /// Create a new page/tab.
    pub async fn new_target(&self, url: Option<&str>) -> Result<TargetDescriptor, CdpError> {
        // Chrome requires PUT method for /json/new
        let path = match url {
            Some(u) => format!(
                "/json/new?{}",
                url::form_urlencoded::byte_serialize(u.as_bytes()).collect::<String>()
            ),
            None => "/json/new".to_string(),
        };
        let target: TargetDescriptor = self
            .request(Method::PUT, &path)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.rewrite_target(target)
    }
}

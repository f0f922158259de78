//! Multiplexed Chrome DevTools Protocol (CDP) client.
//!
//! One WebSocket carries the browser session and every attached target
//! session. This crate owns the protocol layer on top of it: connection-wide
//! request ids, response correlation, per-session event routing, and the
//! attach/detach lifecycle.
//!
//! ```text
//!  Session(root) ─┐                       ┌─► pending request table (by id)
//!  Session(S1)  ──┼─► serialized writer ──►  WebSocket  ──► read loop ─┤
//!  Session(S2)  ──┘                       └─► session registry (by sessionId)
//! ```
//!
//! ## Usage
//!
//! 1. Start Chrome with remote debugging:
//!    ```bash
//!    chrome --remote-debugging-port=9222
//!    ```
//!
//! 2. Connect, attach and listen:
//!    ```rust,ignore
//!    let conn = Connection::connect_endpoint("http://localhost:9222", ConnectionConfig::default()).await?;
//!    let page = conn.attach("E3B1...").await?;
//!    let mut loads = page.subscribe(EventFilter::method("Page.loadEventFired"))?;
//!    page.send_command("Page.enable", None).await?;
//!    page.send_command("Page.navigate", Some(json!({"url": "https://example.com"}))).await?;
//!    loads.recv().await;
//!    page.detach().await?;
//!    ```

mod codec;
mod command;
mod config;
mod connection;
mod correlator;
mod discovery;
mod error;
mod host;
mod registry;
mod session;
pub mod target;
pub mod transport;
mod types;

pub use command::{Command, EmptyResponse};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionStats};
pub use correlator::PendingInfo;
pub use discovery::{BrowserVersion, DiscoveryClient, TargetDescriptor};
pub use error::CdpError;
pub use host::{HostRewriter, rewrite_url};
pub use registry::EventStream;
pub use session::{Session, SessionState};
pub use transport::{FrameSink, FrameStream, TransportError};
pub use types::{CdpEvent, EventFilter, SessionId, SharedEvent, TargetId};

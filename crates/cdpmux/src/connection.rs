//! The shared CDP connection: one read loop, one serialized write path.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{self, InboundFrame};
use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::correlator::{PendingInfo, RequestCorrelator, ResponseHook};
use crate::discovery::DiscoveryClient;
use crate::error::CdpError;
use crate::registry::{DispatchOutcome, SessionRegistry};
use crate::session::Session;
use crate::target::{
    AttachToTarget, CloseTarget, CreateTarget, DetachFromTarget, DetachedFromTarget, GetTargets,
    TargetInfo,
};
use crate::transport::{self, FrameSink, FrameStream};
use crate::types::{CdpEvent, SessionId, TargetId};

/// Upper bound for the close handshake in [`Connection::close`].
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Diagnostic counters of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub unmatched_responses: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
    unmatched_responses: AtomicU64,
    events_dispatched: AtomicU64,
    events_dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// State touched by the read loop. Does not own the channel.
pub(crate) struct Shared {
    pub(crate) correlator: RequestCorrelator,
    pub(crate) registry: SessionRegistry,
    counters: Counters,
    closed: AtomicBool,
    terminated: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        let registry = SessionRegistry::new();
        registry.register(None, None);
        Self {
            correlator: RequestCorrelator::new(),
            registry,
            counters: Counters::default(),
            closed: AtomicBool::new(false),
            terminated: CancellationToken::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail everything in flight and drop every session. Idempotent.
    fn terminate(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.correlator.fail_all(|| CdpError::ConnectionClosed);
        let sessions = self.registry.clear();
        debug!(
            failed_requests = failed,
            sessions, "CDP connection terminated: {}", reason
        );
        self.terminated.cancel();
    }

    fn handle_frame(&self, text: &str) {
        Counters::bump(&self.counters.frames_received);
        trace!("CDP recv: {}", text);

        match codec::decode(text) {
            Ok(InboundFrame::Response { id, result }) => {
                if !self.correlator.resolve(id, result) {
                    Counters::bump(&self.counters.unmatched_responses);
                    trace!(id, "response for a request nobody is waiting on");
                }
            }
            Ok(InboundFrame::Error { id, error }) => {
                let error = CdpError::Protocol {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                };
                if !self.correlator.fail(id, error) {
                    Counters::bump(&self.counters.unmatched_responses);
                    trace!(id, "error for a request nobody is waiting on");
                }
            }
            Ok(InboundFrame::Event(event)) => self.route_event(event),
            Err(e) => {
                Counters::bump(&self.counters.decode_errors);
                warn!("Dropping malformed CDP frame: {}", e);
            }
        }
    }

    fn route_event(&self, event: CdpEvent) {
        let remote_detach = if event.session_id.is_none()
            && event.method == DetachedFromTarget::METHOD
        {
            event.params_as::<DetachedFromTarget>().ok()
        } else {
            None
        };

        match self.registry.dispatch(event) {
            DispatchOutcome::Delivered(_) => Counters::bump(&self.counters.events_dispatched),
            DispatchOutcome::UnknownSession => Counters::bump(&self.counters.events_dropped),
        }

        if let Some(detached) = remote_detach {
            if self.registry.unregister(&Some(detached.session_id.clone())) {
                debug!("Session {} detached by the browser", detached.session_id);
            }
        }
    }
}

/// Sole reader of the channel.
async fn read_loop(mut stream: FrameStream, shared: Arc<Shared>, shutdown: CancellationToken) {
    let reason = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break "closed locally",
            frame = stream.next() => match frame {
                Some(Ok(text)) => shared.handle_frame(&text),
                Some(Err(e)) => {
                    warn!("CDP transport error: {}", e);
                    break "transport error";
                }
                None => break "closed by peer",
            },
        }
    };
    shared.terminate(reason);
}

/// Registers the session named in an attach response from the read loop.
///
/// Flags `reissued` instead of sharing a slot that is still attached, and
/// never leaves a registration behind on a terminated connection.
fn attach_hook(shared: Weak<Shared>, target_id: TargetId, reissued: Arc<AtomicBool>) -> ResponseHook {
    Box::new(move |result: &Value| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let Some(session_id) = result.get("sessionId").and_then(Value::as_str) else {
            return;
        };
        let key = Some(SessionId::from(session_id));
        if !shared.registry.register(key.clone(), Some(target_id)) {
            warn!("Browser reissued session id {} which is still attached", session_id);
            reissued.store(true, Ordering::SeqCst);
            return;
        }
        // terminate() marks the connection closed before clearing the registry.
        if shared.is_closed() {
            shared.registry.unregister(&key);
        }
    })
}

pub(crate) struct ConnectionInner {
    pub(crate) shared: Arc<Shared>,
    writer: tokio::sync::Mutex<FrameSink>,
    shutdown: CancellationToken,
    pub(crate) config: ConnectionConfig,
    url: Option<String>,
    read_task: tokio::task::JoinHandle<()>,
}

impl ConnectionInner {
    /// Register, write, then wait for the response to `method`.
    pub(crate) async fn send(
        &self,
        session_id: Option<&SessionId>,
        method: &str,
        params: Option<Value>,
        hook: Option<ResponseHook>,
        timeout: Option<Duration>,
    ) -> Result<Value, CdpError> {
        if self.shared.is_closed() {
            return Err(CdpError::ConnectionClosed);
        }

        let correlator = &self.shared.correlator;
        let id = correlator.next_id();
        let text = codec::encode(id, method, params.as_ref(), session_id)?;
        let pending = correlator.register(id, method, hook)?;

        // The deadline covers queueing for the writer and the write itself.
        let exchange = async {
            self.write(method, id, text).await?;
            pending.await
        };
        let Some(limit) = timeout else {
            return exchange.await;
        };
        match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!("CDP request {} (id {}) timed out after {:?}", method, id, limit);
                Err(CdpError::Timeout {
                    method: method.to_string(),
                    id,
                })
            }
        }
    }

    /// Write one envelope. Gives up as soon as the connection terminates,
    /// even while queued behind a stalled writer.
    async fn write(&self, method: &str, id: u64, text: String) -> Result<(), CdpError> {
        trace!("CDP send: {}", text);
        let written = tokio::select! {
            biased;
            _ = self.shared.terminated.cancelled() => return Err(CdpError::ConnectionClosed),
            written = async {
                let mut writer = self.writer.lock().await;
                writer.send(text).await
            } => written,
        };

        if let Err(e) = written {
            warn!("CDP write failed for {} (id {}): {}", method, id, e);
            self.shutdown("write failed");
            return Err(CdpError::ConnectionClosed);
        }
        Ok(())
    }

    fn shutdown(&self, reason: &str) {
        self.shared.terminate(reason);
        self.shutdown.cancel();
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.shutdown("connection dropped");
        self.read_task.abort();
    }
}

/// A multiplexed CDP connection.
///
/// Cheap to clone. Sessions only hold weak references, so the connection
/// terminates once the last `Connection` handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to a browser (or page) debugger WebSocket URL.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let conn = Connection::connect(
    ///     "ws://localhost:9222/devtools/browser/2f5c...",
    ///     ConnectionConfig::default(),
    /// )
    /// .await?;
    /// ```
    pub async fn connect(ws_url: &str, config: ConnectionConfig) -> Result<Self, CdpError> {
        let (sink, stream) =
            transport::connect_websocket(ws_url, config.host_override.as_deref()).await?;
        debug!("CDP client connected to {}", ws_url);
        Ok(Self::build(sink, stream, config, Some(ws_url.to_string())))
    }

    /// Resolve the browser WebSocket URL from an HTTP endpoint
    /// (e.g. `http://localhost:9222`) and connect to it.
    pub async fn connect_endpoint(endpoint: &str, config: ConnectionConfig) -> Result<Self, CdpError> {
        let discovery = DiscoveryClient::new(endpoint, config.host_override.clone())?;
        let version = discovery.version().await?;
        debug!("Connected to browser: {}", version.browser);
        Self::connect(&version.web_socket_debugger_url, config).await
    }

    /// Run the protocol over an already established frame transport.
    ///
    /// Must be called within a tokio runtime; the read loop is spawned here.
    pub fn from_transport(sink: FrameSink, stream: FrameStream, config: ConnectionConfig) -> Self {
        Self::build(sink, stream, config, None)
    }

    fn build(
        sink: FrameSink,
        stream: FrameStream,
        config: ConnectionConfig,
        url: Option<String>,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let shutdown = CancellationToken::new();
        let read_task = tokio::spawn(read_loop(stream, Arc::clone(&shared), shutdown.clone()));

        Self {
            inner: Arc::new(ConnectionInner {
                shared,
                writer: tokio::sync::Mutex::new(sink),
                shutdown,
                config,
                url,
                read_task,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// WebSocket URL this connection was opened with, if any.
    pub fn url(&self) -> Option<&str> {
        self.inner.url.as_deref()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The browser-level session.
    pub fn root(&self) -> Session {
        Session::new(None, None, self.downgrade())
    }

    /// Handle for an attached session, if it is still registered.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        let key = Some(session_id.clone());
        if !self.inner.shared.registry.contains(&key) {
            return None;
        }
        let target_id = self.inner.shared.registry.target_of(&key);
        Some(Session::new(key, target_id, self.downgrade()))
    }

    /// Every attached (non-root) session.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner
            .shared
            .registry
            .session_ids()
            .iter()
            .filter_map(|id| self.session(id))
            .collect()
    }

    /// Session currently attached to `target_id`, if any.
    pub fn session_for_target(&self, target_id: &TargetId) -> Option<Session> {
        let session_id = self.inner.shared.registry.session_for_target(target_id)?;
        self.session(&session_id)
    }

    /// Send a command on the root session.
    pub async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.inner
            .send(None, method, params, None, self.inner.config.request_timeout)
            .await
    }

    /// Send a typed command on the root session.
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Response, CdpError> {
        self.root().execute(command).await
    }

    /// Attach to a target and return its session.
    ///
    /// The session is registered by the read loop as soon as the response
    /// arrives, so no event sent right after it is lost.
    pub async fn attach(&self, target_id: impl Into<TargetId>) -> Result<Session, CdpError> {
        let target_id = target_id.into();
        debug!("Attaching to target {}", target_id);

        let reissued = Arc::new(AtomicBool::new(false));
        let hook = attach_hook(
            Arc::downgrade(&self.inner.shared),
            target_id.clone(),
            Arc::clone(&reissued),
        );

        let params = serde_json::to_value(AttachToTarget {
            target_id: target_id.clone(),
            flatten: true,
        })?;
        let result = self
            .inner
            .send(
                None,
                AttachToTarget::METHOD,
                Some(params),
                Some(hook),
                self.inner.config.request_timeout,
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::from)
            .ok_or_else(|| CdpError::InvalidResponse("Missing sessionId".to_string()))?;
        if reissued.load(Ordering::SeqCst) {
            return Err(CdpError::InvalidResponse(format!(
                "sessionId {session_id} is already attached"
            )));
        }
        if self.is_closed() {
            return Err(CdpError::ConnectionClosed);
        }

        debug!("Attached to target {} as session {}", target_id, session_id);
        Ok(Session::new(Some(session_id), Some(target_id), self.downgrade()))
    }

    /// Detach a session. Event delivery stops immediately; the detach command
    /// itself is best-effort. Never closes the connection.
    pub async fn detach(&self, session: &Session) -> Result<(), CdpError> {
        if !session.belongs_to(&self.inner) {
            return Err(CdpError::InvalidOperation(
                "session belongs to another connection".to_string(),
            ));
        }
        let Some(session_id) = session.session_id().cloned() else {
            return Err(CdpError::InvalidOperation(
                "the root session cannot be detached".to_string(),
            ));
        };

        if !self.inner.shared.registry.unregister(&Some(session_id.clone())) {
            debug!("Session {} already detached", session_id);
            return Ok(());
        }

        let params = serde_json::to_value(DetachFromTarget {
            session_id: session_id.clone(),
        })?;
        match self
            .inner
            .send(
                None,
                DetachFromTarget::METHOD,
                Some(params),
                None,
                Some(self.inner.config.detach_timeout),
            )
            .await
        {
            Ok(_) => debug!("Detached session {}", session_id),
            Err(e) => debug!("Detach command for session {} failed: {}", session_id, e),
        }
        Ok(())
    }

    /// Open a new page and attach to it.
    pub async fn create_target(&self, url: &str) -> Result<Session, CdpError> {
        let created = self.execute(CreateTarget::new(url)).await?;
        debug!("Created new target {} ({})", created.target_id, url);
        self.attach(created.target_id).await
    }

    /// Close a target. Its session, if any, is dropped when the browser
    /// reports the detach.
    pub async fn close_target(&self, target_id: impl Into<TargetId>) -> Result<(), CdpError> {
        self.execute(CloseTarget {
            target_id: target_id.into(),
        })
        .await?;
        Ok(())
    }

    /// Get all targets.
    pub async fn get_targets(&self) -> Result<Vec<TargetInfo>, CdpError> {
        Ok(self.execute(GetTargets::default()).await?.target_infos)
    }

    /// Close the connection. Pending requests fail with
    /// [`CdpError::ConnectionClosed`] before this returns.
    pub async fn close(&self) {
        self.inner.shutdown("closed locally");

        // Writers bail out on termination, so the lock frees up quickly; a
        // sink that never finishes closing is abandoned.
        let closed = tokio::time::timeout(WRITER_CLOSE_TIMEOUT, async {
            let mut writer = self.inner.writer.lock().await;
            writer.close().await
        })
        .await;
        match closed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing CDP channel: {}", e),
            Err(_) => debug!("CDP channel did not close within {:?}", WRITER_CLOSE_TIMEOUT),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// Resolves once the connection has terminated, for whatever reason.
    pub async fn closed(&self) {
        self.inner.shared.terminated.cancelled().await;
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> Vec<PendingInfo> {
        self.inner.shared.correlator.pending()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.shared.counters.snapshot()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.shared.correlator.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

//! Session handles scoped to one target.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;

use crate::command::Command;
use crate::connection::{Connection, ConnectionInner};
use crate::error::CdpError;
use crate::registry::EventStream;
use crate::types::{EventFilter, SessionId, SessionKey, TargetId};

/// Lifecycle of a session handle as observed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Attached,
    /// Detached locally, by the browser, or because the connection ended.
    Detached,
}

/// A session attached to a single target, or the root browser session.
///
/// Does not keep the connection alive.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: SessionKey,
    target_id: Option<TargetId>,
    conn: Weak<ConnectionInner>,
}

impl Session {
    pub(crate) fn new(
        session_id: SessionKey,
        target_id: Option<TargetId>,
        conn: Weak<ConnectionInner>,
    ) -> Self {
        Self {
            session_id,
            target_id,
            conn,
        }
    }

    /// Session ID, `None` for the root session.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Target ID, when known.
    pub fn target_id(&self) -> Option<&TargetId> {
        self.target_id.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.session_id.is_none()
    }

    pub fn state(&self) -> SessionState {
        match self.conn.upgrade() {
            Some(inner)
                if !inner.shared.is_closed() && inner.shared.registry.contains(&self.session_id) =>
            {
                SessionState::Attached
            }
            _ => SessionState::Detached,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state() == SessionState::Attached
    }

    /// The owning connection, if it is still alive.
    pub fn connection(&self) -> Option<Connection> {
        self.conn.upgrade().map(Connection::from_inner)
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<ConnectionInner>) -> bool {
        std::ptr::eq(self.conn.as_ptr(), Arc::as_ptr(inner))
    }

    fn live(&self) -> Result<Arc<ConnectionInner>, CdpError> {
        let inner = self.conn.upgrade().ok_or(CdpError::ConnectionClosed)?;
        if inner.shared.is_closed() {
            return Err(CdpError::ConnectionClosed);
        }
        if !inner.shared.registry.contains(&self.session_id) {
            return Err(match &self.session_id {
                Some(id) => CdpError::SessionDetached(id.clone()),
                None => CdpError::ConnectionClosed,
            });
        }
        Ok(inner)
    }

    /// Send a CDP command to this session with the connection's default timeout.
    pub async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        let inner = self.live()?;
        let timeout = inner.config.request_timeout;
        inner
            .send(self.session_id.as_ref(), method, params, None, timeout)
            .await
    }

    /// Send a CDP command with an explicit deadline (`None` waits indefinitely).
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CdpError> {
        let inner = self.live()?;
        inner
            .send(self.session_id.as_ref(), method, params, None, timeout)
            .await
    }

    /// Send a typed command.
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Response, CdpError> {
        let params = serde_json::to_value(&command)?;
        let result = self.send_command(C::METHOD, Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| CdpError::InvalidResponse(format!("{}: {}", C::METHOD, e)))
    }

    /// Subscribe to events of this session matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Result<EventStream, CdpError> {
        let inner = self.live()?;
        inner
            .shared
            .registry
            .subscribe(&self.session_id, filter)
            .ok_or_else(|| match &self.session_id {
                Some(id) => CdpError::SessionDetached(id.clone()),
                None => CdpError::ConnectionClosed,
            })
    }

    /// Number of live listeners on this session.
    pub fn listener_count(&self) -> usize {
        self.conn
            .upgrade()
            .map(|inner| inner.shared.registry.listener_count(&self.session_id))
            .unwrap_or(0)
    }

    /// Subscribe to every event of this session.
    pub fn events(&self) -> Result<EventStream, CdpError> {
        self.subscribe(EventFilter::All)
    }

    /// Detach this session from its target.
    pub async fn detach(&self) -> Result<(), CdpError> {
        let conn = self.connection().ok_or(CdpError::ConnectionClosed)?;
        conn.detach(self).await
    }
}

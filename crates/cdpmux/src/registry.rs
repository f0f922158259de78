//! Session registry and event routing.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{CdpEvent, EventFilter, SessionId, SessionKey, SharedEvent, TargetId};

struct Listener {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<SharedEvent>,
}

struct SessionSlot {
    target_id: Option<TargetId>,
    listeners: Vec<Listener>,
}

/// Result of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// Known session; number of listeners that received the event.
    Delivered(usize),
    /// No such session (never attached, or already detached).
    UnknownSession,
}

/// Maps session ids (root = `None`) to their event listeners.
pub(crate) struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session. Returns false if it was already registered.
    pub fn register(&self, key: SessionKey, target_id: Option<TargetId>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return false;
        }
        sessions.insert(
            key,
            SessionSlot {
                target_id,
                listeners: Vec::new(),
            },
        );
        true
    }

    /// Remove a session. Its listeners' streams end.
    pub fn unregister(&self, key: &SessionKey) -> bool {
        self.sessions.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.read().contains_key(key)
    }

    pub fn target_of(&self, key: &SessionKey) -> Option<TargetId> {
        self.sessions
            .read()
            .get(key)
            .and_then(|slot| slot.target_id.clone())
    }

    /// Attached (non-root) sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().flatten().cloned().collect();
        ids.sort();
        ids
    }

    /// Session bound to `target_id`, if any.
    pub fn session_for_target(&self, target_id: &TargetId) -> Option<SessionId> {
        self.sessions.read().iter().find_map(|(key, slot)| match key {
            Some(session_id) if slot.target_id.as_ref() == Some(target_id) => {
                Some(session_id.clone())
            }
            _ => None,
        })
    }

    /// Add a listener. `None` if the session is not registered.
    pub fn subscribe(&self, key: &SessionKey, filter: EventFilter) -> Option<EventStream> {
        let mut sessions = self.sessions.write();
        let slot = sessions.get_mut(key)?;
        let (tx, rx) = mpsc::unbounded_channel();
        slot.listeners.push(Listener { filter, tx });
        Some(EventStream { rx })
    }

    /// Route an event to the listeners of its session.
    pub fn dispatch(&self, event: CdpEvent) -> DispatchOutcome {
        let key = event.session_id.clone();
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut stale = false;

        {
            let sessions = self.sessions.read();
            let Some(slot) = sessions.get(&key) else {
                trace!(method = %event.method, session = ?key, "dropping event for unknown session");
                return DispatchOutcome::UnknownSession;
            };
            for listener in slot.listeners.iter().filter(|l| l.filter.matches(&event)) {
                if listener.tx.send(Arc::clone(&event)).is_ok() {
                    delivered += 1;
                } else {
                    stale = true;
                }
            }
        }

        if stale {
            if let Some(slot) = self.sessions.write().get_mut(&key) {
                slot.listeners.retain(|l| !l.tx.is_closed());
            }
        }

        DispatchOutcome::Delivered(delivered)
    }

    /// Remove every session, root included.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        count
    }

    pub fn listener_count(&self, key: &SessionKey) -> usize {
        self.sessions
            .read()
            .get(key)
            .map(|slot| slot.listeners.iter().filter(|l| !l.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// Events for one session, in wire order. Ends when the session is detached
/// or the connection terminates.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SharedEvent>,
}

impl EventStream {
    /// Next event, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SharedEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SharedEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = SharedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

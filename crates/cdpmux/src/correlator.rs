//! Request id allocation and response correlation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::CdpError;

/// Runs on the read loop with the `result` of a successful response, before
/// the waiting caller is woken and before the next frame is read.
pub(crate) type ResponseHook = Box<dyn FnOnce(&Value) + Send + Sync>;

/// Pending request waiting for response.
pub(crate) struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Result<Value, CdpError>>,
    hook: Option<ResponseHook>,
}

impl PendingRequest {
    fn complete(self, id: u64, result: Result<Value, CdpError>) {
        if let (Ok(value), Some(hook)) = (&result, self.hook) {
            hook(value);
        }
        if self.tx.send(result).is_err() {
            trace!(id, method = %self.method, "caller went away before its response was delivered");
        }
    }
}

/// Snapshot of one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: u64,
    pub method: String,
    pub age: Duration,
}

struct PendingTable {
    entries: DashMap<u64, PendingRequest>,
    closed: AtomicBool,
}

/// Connection-wide id counter plus the table of in-flight requests.
pub(crate) struct RequestCorrelator {
    next_id: AtomicU64,
    table: Arc<PendingTable>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Arc::new(PendingTable {
                entries: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Fresh id, never reused for the lifetime of this correlator.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter for `id`. Dropping the returned future before it
    /// completes removes the entry again.
    pub fn register(
        &self,
        id: u64,
        method: &str,
        hook: Option<ResponseHook>,
    ) -> Result<PendingResponse, CdpError> {
        if self.is_closed() {
            return Err(CdpError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        match self.table.entries.entry(id) {
            Entry::Occupied(_) => return Err(CdpError::DuplicateRequestId(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    method: method.to_string(),
                    created_at: Instant::now(),
                    tx,
                    hook,
                });
            }
        }

        // fail_all may have swept the table between the check above and the insert.
        if self.is_closed() {
            self.table.entries.remove(&id);
            return Err(CdpError::ConnectionClosed);
        }

        Ok(PendingResponse {
            id,
            rx,
            table: Arc::clone(&self.table),
            finished: false,
        })
    }

    /// Complete `id` with a result. Returns false if nothing was pending.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        match self.table.entries.remove(&id) {
            Some((_, pending)) => {
                pending.complete(id, Ok(result));
                true
            }
            None => false,
        }
    }

    /// Complete `id` with an error. Returns false if nothing was pending.
    pub fn fail(&self, id: u64, error: CdpError) -> bool {
        match self.table.entries.remove(&id) {
            Some((_, pending)) => {
                pending.complete(id, Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending request and refuse new registrations.
    pub fn fail_all(&self, error: impl Fn() -> CdpError) -> usize {
        self.table.closed.store(true, Ordering::SeqCst);

        let ids: Vec<u64> = self.table.entries.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.fail(id, error()) {
                failed += 1;
            }
        }
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.table.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    /// In-flight requests ordered by id.
    pub fn pending(&self) -> Vec<PendingInfo> {
        let now = Instant::now();
        let mut pending: Vec<PendingInfo> = self
            .table
            .entries
            .iter()
            .map(|entry| PendingInfo {
                id: *entry.key(),
                method: entry.method.clone(),
                age: now.saturating_duration_since(entry.created_at),
            })
            .collect();
        pending.sort_by_key(|info| info.id);
        pending
    }
}

/// Resolves to the response for one request id.
pub(crate) struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Result<Value, CdpError>>,
    table: Arc<PendingTable>,
    finished: bool,
}

impl Future for PendingResponse {
    type Output = Result<Value, CdpError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.finished = true;
                Poll::Ready(result.unwrap_or(Err(CdpError::ConnectionClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.finished && self.table.entries.remove(&self.id).is_some() {
            trace!(id = self.id, "request abandoned before its response arrived");
        }
    }
}

#[cfg(test)]
#[path = "correlator_tests.rs"]
mod tests;

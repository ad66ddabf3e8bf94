//! Approval queue.
//!
//! Requests that need a human (or an automated resolver) are appended to
//! `state.request_queue` as pending entries. A resolver picks them up,
//! writes a result with [`RequestQueue::complete`], and the original caller's
//! [`PendingRequest`] resolves. Emptying the queue rejects every caller
//! still waiting.
//!
//! ```rust,no_run
//! # async fn example(queue: &batua::queue::RequestQueue) -> Result<(), batua::Error> {
//! let pending = queue.enqueue("eth_requestAccounts", serde_json::json!([]));
//! let id = pending.id();
//!
//! // somewhere else, the resolver approves:
//! queue.complete(id, Ok(serde_json::json!(["0x1111111111111111111111111111111111111111"])));
//!
//! let accounts = pending.await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, ProviderError};
use crate::store::{Store, Subscription};
use crate::types::RpcRequest;

/// Lifecycle of a queued request.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueStatus {
    Pending,
    Success(Value),
    Error(ProviderError),
}

/// A request waiting for (or holding) a resolver's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub request: RpcRequest,
    pub status: QueueStatus,
}

impl QueuedRequest {
    pub fn id(&self) -> u64 {
        self.request.id
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, QueueStatus::Pending)
    }
}

type Outcome = Result<Value, ProviderError>;
type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
    waiters.lock().unwrap_or_else(|e| e.into_inner())
}

/// Bridges callers to the resolver through `state.request_queue`.
pub struct RequestQueue {
    store: Arc<Store>,
    waiters: Waiters,
    next_id: AtomicU64,
    _subscription: Subscription,
}

impl RequestQueue {
    pub fn new(store: Arc<Store>) -> Self {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let subscription = store.subscribe_selector(|s| s.request_queue.clone(), {
            let waiters = Arc::clone(&waiters);
            let store = Arc::downgrade(&store);
            move |queue: &Vec<QueuedRequest>, _prev: &Vec<QueuedRequest>| {
                deliver(&store, &waiters, queue)
            }
        });
        Self {
            store,
            waiters,
            next_id: AtomicU64::new(1),
            _subscription: subscription,
        }
    }

    /// Append a pending request and return a future for its result.
    pub fn enqueue(&self, method: impl Into<String>, params: Value) -> PendingRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let request = RpcRequest {
            id,
            method: method.into(),
            params,
        };
        debug!(request_id = id, method = %request.method, "enqueue");
        self.store.update(|state| {
            lock(&self.waiters).insert(id, tx);
            state.request_queue.push(QueuedRequest {
                request,
                status: QueueStatus::Pending,
            });
        });
        PendingRequest { id, rx }
    }

    /// Record the resolver's answer for a pending request.
    ///
    /// Returns `false` (and changes nothing) if no pending entry has this id.
    pub fn complete(&self, id: u64, outcome: Result<Value, ProviderError>) -> bool {
        let matched = self.store.update(|state| {
            match state
                .request_queue
                .iter_mut()
                .find(|entry| entry.id() == id && entry.is_pending())
            {
                Some(entry) => {
                    entry.status = match outcome {
                        Ok(value) => QueueStatus::Success(value),
                        Err(error) => QueueStatus::Error(error),
                    };
                    true
                }
                None => false,
            }
        });
        if !matched {
            debug!(request_id = id, "complete ignored: no pending entry");
        }
        matched
    }

    /// Drop every entry. Callers still waiting are rejected.
    pub fn reject_all(&self) {
        self.store.update(|state| state.request_queue.clear());
    }

    /// Entries still waiting for a resolver.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        self.store.read(|s| {
            s.request_queue
                .iter()
                .filter(|e| e.is_pending())
                .cloned()
                .collect()
        })
    }

    /// Look up an entry by id.
    pub fn get(&self, id: u64) -> Option<QueuedRequest> {
        self.store
            .read(|s| s.request_queue.iter().find(|e| e.id() == id).cloned())
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("waiting", &lock(&self.waiters).len())
            .finish()
    }
}

/// Hand terminal entries to their callers and drop them from the queue.
fn deliver(store: &Weak<Store>, waiters: &Waiters, queue: &[QueuedRequest]) {
    let Some(store) = store.upgrade() else {
        return;
    };

    if queue.is_empty() {
        // Only reject waiters whose entry is really gone; a concurrent enqueue
        // may already have added a new one.
        let live: HashSet<u64> = store.read(|s| s.request_queue.iter().map(|e| e.id()).collect());
        let rejected: Vec<_> = {
            let mut waiters = lock(waiters);
            let ids: Vec<u64> = waiters.keys().filter(|id| !live.contains(id)).copied().collect();
            ids.into_iter()
                .filter_map(|id| waiters.remove(&id).map(|tx| (id, tx)))
                .collect()
        };
        for (id, tx) in rejected {
            debug!(request_id = id, "queue emptied, rejecting");
            let _ = tx.send(Err(ProviderError::UserRejected));
        }
        return;
    }

    let mut finished = Vec::new();
    {
        let mut waiters = lock(waiters);
        for entry in queue {
            let outcome = match &entry.status {
                QueueStatus::Pending => continue,
                QueueStatus::Success(value) => Ok(value.clone()),
                QueueStatus::Error(error) => Err(error.clone()),
            };
            if let Some(tx) = waiters.remove(&entry.id()) {
                debug!(request_id = entry.id(), ok = outcome.is_ok(), "deliver");
                let _ = tx.send(outcome);
            }
            finished.push(entry.id());
        }
    }

    if !finished.is_empty() {
        store.update(|state| {
            state
                .request_queue
                .retain(|entry| !(finished.contains(&entry.id()) && !entry.is_pending()))
        });
    }
}

/// Result of an enqueued request.
///
/// Resolves with the resolver's answer, or [`ProviderError::UserRejected`] if the
/// queue was emptied (or dropped) first.
#[must_use = "the result of a queued request is only observable by awaiting it"]
pub struct PendingRequest {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingRequest {
    type Output = Result<Value, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(ProviderError::UserRejected.into()),
        })
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish()
    }
}

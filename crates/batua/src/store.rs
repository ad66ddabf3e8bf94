//! Observable wallet state.
//!
//! The [`Store`] is the single source of truth for connected accounts, the
//! active chain, the approval queue and the fiat price. Everything else
//! (events, persistence, queue delivery) hangs off store subscriptions.
//!
//! Listeners run synchronously after each mutation, outside the state lock,
//! in registration order. A listener may itself call [`Store::update`]; that
//! update is applied immediately and its notification is delivered once the
//! current round of listeners has finished, so notifications always arrive in
//! mutation order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::queue::QueuedRequest;
use crate::types::{Account, Address, ChainId};

/// Wallet state.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub accounts: Vec<Account>,
    pub chain: ChainId,
    pub request_queue: Vec<QueuedRequest>,
    pub price: Option<f64>,
}

impl State {
    pub fn new(chain: ChainId) -> Self {
        Self {
            accounts: Vec::new(),
            chain,
            request_queue: Vec::new(),
            price: None,
        }
    }

    /// Connected addresses, in connection order.
    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address).collect()
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.iter().find(|a| a.address == *address)
    }

    /// The part of the state that survives restarts.
    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            accounts: self.accounts.clone(),
            chain: self.chain,
            price: self.price,
        }
    }
}

/// Persisted projection of [`State`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub accounts: Vec<Account>,
    pub chain: ChainId,
    #[serde(default)]
    pub price: Option<f64>,
}

type Listener = Arc<dyn Fn(&State, &State) + Send + Sync>;

struct Inner {
    state: State,
    pending: VecDeque<(State, State)>,
    notifying: bool,
}

/// Observable state container.
pub struct Store {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl Store {
    pub fn new(state: State) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                pending: VecDeque::new(),
                notifying: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is replaced wholesale, so a poisoned lock still holds a consistent value.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the current state.
    pub fn get(&self) -> State {
        self.lock().state.clone()
    }

    /// Read from the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.lock().state)
    }

    /// Mutate the state atomically, then notify listeners.
    pub fn update<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let result = {
            let mut inner = self.lock();
            let prev = inner.state.clone();
            let result = f(&mut inner.state);
            if inner.state != prev {
                let next = inner.state.clone();
                inner.pending.push_back((prev, next));
            }
            if inner.notifying {
                return result;
            }
            inner.notifying = true;
            result
        };

        loop {
            let (prev, next) = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        inner.notifying = false;
                        break;
                    }
                }
            };
            let listeners: Vec<Listener> = self
                .lock_listeners()
                .iter()
                .map(|(_, l)| Arc::clone(l))
                .collect();
            for listener in listeners {
                listener(&prev, &next);
            }
        }
        result
    }

    /// Listen to every change. Receives `(prev, next)`.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&State, &State) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(self),
        }
    }

    /// Listen to changes of one projection of the state. Receives `(next, prev)`
    /// and only fires when the projection actually changed.
    pub fn subscribe_selector<T, S, L>(self: &Arc<Self>, selector: S, listener: L) -> Subscription
    where
        T: PartialEq,
        S: Fn(&State) -> T + Send + Sync + 'static,
        L: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.subscribe(move |prev, next| {
            let before = selector(prev);
            let after = selector(next);
            if before != after {
                listener(&after, &before);
            }
        })
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_listeners().retain(|(listener_id, _)| *listener_id != id);
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    store: Weak<Store>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

//! Per-instance wallet context.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::ClientCache;
use crate::config::Config;
use crate::queue::RequestQueue;
use crate::store::{State, Store, Subscription};
use crate::types::ChainId;

/// Everything one provider instance shares with its implementation and flows.
pub struct WalletContext {
    id: Uuid,
    config: Config,
    store: Arc<Store>,
    clients: ClientCache,
    queue: RequestQueue,
}

impl WalletContext {
    pub fn new(config: Config, state: State) -> Arc<Self> {
        let id = Uuid::new_v4();
        let store = Store::new(state);
        let clients = ClientCache::new(
            id,
            Arc::clone(&store),
            config.chains().to_vec(),
            config.account_version.entry_point,
            config.timeouts.polling_interval,
        );
        let queue = RequestQueue::new(Arc::clone(&store));
        Arc::new(Self {
            id,
            config,
            store,
            clients,
            queue,
        })
    }

    /// Identifier of this instance; client cache entries are keyed by it.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn clients(&self) -> &ClientCache {
        &self.clients
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Active chain.
    pub fn chain(&self) -> ChainId {
        self.store.read(|s| s.chain)
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}

/// Background work to stop when the provider is destroyed.
///
/// Dropping a `Teardown` aborts its tasks and drops its subscriptions.
#[must_use = "dropping a Teardown stops the work it owns"]
#[derive(Default)]
pub struct Teardown {
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

impl Teardown {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn task(mut self, handle: JoinHandle<()>) -> Self {
        self.tasks.push(handle);
        self
    }

    pub fn subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn merge(mut self, other: Teardown) -> Self {
        let mut other = other;
        self.tasks.append(&mut other.tasks);
        self.subscriptions.append(&mut other.subscriptions);
        self
    }

    /// Stop everything now.
    pub fn run(self) {
        drop(self);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.subscriptions.is_empty()
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.subscriptions.clear();
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("tasks", &self.tasks.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

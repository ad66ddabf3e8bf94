//! The wallet provider.
//!
//! [`Provider`] is the single entry point for a dApp: it takes raw
//! JSON-RPC-style requests, validates them, answers what it can from the
//! [`Store`](crate::store::Store), hands account operations to its
//! [`Implementation`], and forwards everything else to the active chain.
//!
//! | Method | Answered by |
//! |--------|-------------|
//! | `eth_accounts`, `eth_chainId`, `wallet_getCapabilities`, `wallet_revokePermissions` | store and config |
//! | `eth_requestAccounts`, `eth_sendTransaction`, `wallet_sendCalls`, `wallet_getCallsStatus` | implementation |
//! | other `wallet_*`, `personal_sign`, `eth_sign*`, ... | `UnsupportedMethod` |
//! | anything else | the active chain's RPC node |
//!
//! State changes are announced as [`ProviderEvent`]s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, PassthroughPolicy};
use crate::context::{Teardown, WalletContext};
use crate::error::{Error, ProviderError, RpcError};
use crate::implementation::{Implementation, LocalImplementation};
use crate::price::{PricePoller, PriceSource};
use crate::schema::{self, ParsedRequest};
use crate::storage::STORE_KEY;
use crate::store::{PersistedState, State};
use crate::types::{
    Call, ChainCapabilities, ChainId, RawRequest, SendCallsCapabilities, TypedRequest,
    WalletCapabilities, quantity,
};

const EVENT_CAPACITY: usize = 64;

/// Changes a dApp can listen to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The first account was connected.
    Connect { chain_id: ChainId },
    AccountsChanged(Vec<Address>),
    ChainChanged { chain_id: ChainId },
}

/// An embedded passkey wallet.
///
/// # Example
///
/// ```rust,no_run
/// use batua::{ChainConfig, Config, Provider, RawRequest};
///
/// #[tokio::main]
/// async fn main() -> Result<(), batua::Error> {
///     let config = Config::builder()
///         .dapp_name("Example dApp")
///         .chain(ChainConfig::sepolia())
///         .build()?;
///     let provider = Provider::create(config).await?;
///
///     let chain_id = provider.request(RawRequest::without_params("eth_chainId")).await?;
///     println!("active chain: {chain_id}");
///     Ok(())
/// }
/// ```
pub struct Provider {
    ctx: Arc<WalletContext>,
    implementation: Arc<dyn Implementation>,
    events: broadcast::Sender<ProviderEvent>,
    teardown: Mutex<Option<Teardown>>,
}

impl Provider {
    pub fn builder(config: Config) -> ProviderBuilder {
        ProviderBuilder::new(config)
    }

    /// A provider that resolves requests through the approval queue.
    pub async fn create(config: Config) -> Result<Self, Error> {
        Self::builder(config).build().await
    }

    /// The context shared with flows and the implementation.
    pub fn context(&self) -> &Arc<WalletContext> {
        &self.ctx
    }

    /// Listen to provider events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Handle a raw request.
    pub async fn request(&self, raw: RawRequest) -> Result<Value, Error> {
        match schema::parse_request(&raw)? {
            ParsedRequest::Wallet(request) => self.handle(request).await,
            ParsedRequest::Passthrough(raw) => self.passthrough(raw).await,
        }
    }

    /// Handle an already validated request.
    pub async fn handle(&self, request: TypedRequest) -> Result<Value, Error> {
        let method = request.method();
        debug!(%method, "handling request");

        match request {
            TypedRequest::Accounts => {
                let addresses = self.connected()?;
                Ok(json!(addresses))
            }
            TypedRequest::ChainId => Ok(json!(quantity::encode_u64(self.ctx.chain()))),
            TypedRequest::RequestAccounts => {
                let addresses = self
                    .request_accounts(&TypedRequest::RequestAccounts)
                    .await?;
                Ok(json!(addresses))
            }
            TypedRequest::SendCalls(params) => {
                let hash = self
                    .send_calls(
                        params.from,
                        params.chain_id,
                        params.calls,
                        params.capabilities,
                    )
                    .await?;
                Ok(json!(hash))
            }
            TypedRequest::SendTransaction(params) => {
                let call = params.to_call();
                let hash = self
                    .send_calls(Some(params.from), params.chain_id, vec![call], None)
                    .await?;
                let transaction_hash = self.wait_for_transaction(hash).await?;
                Ok(json!(transaction_hash))
            }
            TypedRequest::GetCallsStatus(id) => {
                self.connected()?;
                let timeout = self.ctx.config().timeouts.status_poll;
                let status = self
                    .implementation
                    .get_calls_status(&self.ctx, id, timeout)
                    .await?;
                Ok(serde_json::to_value(status)?)
            }
            TypedRequest::GetCapabilities(_) => Ok(serde_json::to_value(self.capabilities())?),
            TypedRequest::RevokePermissions(_) => {
                self.connected()?;
                self.ctx.store().update(|state| state.accounts.clear());
                info!("accounts disconnected");
                Ok(Value::Null)
            }
        }
    }

    /// Make `chain_id` the active chain.
    pub fn switch_chain(&self, chain_id: ChainId) -> Result<(), ProviderError> {
        if self.ctx.config().chain(chain_id).is_none() {
            return Err(ProviderError::Configuration(format!(
                "chain {chain_id} not found"
            )));
        }
        self.ctx.store().update(|state| state.chain = chain_id);
        Ok(())
    }

    /// Stop background work and reject every queued request.
    ///
    /// The provider keeps answering store-backed requests afterwards, but
    /// nothing resolves queued ones anymore.
    pub fn destroy(&self) {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(teardown) = teardown {
            teardown.run();
            info!(instance = %self.ctx.id(), "provider destroyed");
        }
        self.ctx.queue().reject_all();
    }

    // ========================================================================
    // Dispatch helpers
    // ========================================================================

    fn connected(&self) -> Result<Vec<Address>, ProviderError> {
        let addresses = self.ctx.store().read(State::addresses);
        if addresses.is_empty() {
            return Err(ProviderError::Disconnected);
        }
        Ok(addresses)
    }

    async fn request_accounts(&self, request: &TypedRequest) -> Result<Vec<Address>, Error> {
        let existing = self.ctx.store().read(State::addresses);
        if !existing.is_empty() {
            return Ok(existing);
        }

        let loaded = self.implementation.load_accounts(&self.ctx, request).await?;
        let addresses: Vec<Address> = loaded.iter().map(|a| a.address).collect();
        self.ctx.store().update(|state| {
            for account in loaded {
                if state.account(&account.address).is_none() {
                    state.accounts.push(account.into_account());
                }
            }
        });
        info!(count = addresses.len(), "accounts connected");
        Ok(addresses)
    }

    async fn send_calls(
        &self,
        from: Option<Address>,
        chain_id: Option<ChainId>,
        calls: Vec<Call>,
        capabilities: Option<SendCallsCapabilities>,
    ) -> Result<B256, Error> {
        let (account, active_chain) = self.ctx.store().read(|state| {
            let first = state
                .accounts
                .first()
                .map(|a| a.address)
                .ok_or(ProviderError::Disconnected)?;
            let from = from.unwrap_or(first);
            let account = state
                .account(&from)
                .cloned()
                .ok_or(ProviderError::Unauthorized)?;
            Ok::<_, ProviderError>((account, state.chain))
        })?;

        if let Some(chain_id) = chain_id {
            if chain_id != active_chain {
                warn!(chain_id, active_chain, "request for inactive chain");
                return Err(ProviderError::ChainDisconnected.into());
            }
        }

        self.implementation
            .send_calls(&self.ctx, &account, &calls, capabilities.as_ref())
            .await
    }

    /// Poll the batch status until it is terminal and return its transaction.
    async fn wait_for_transaction(&self, id: B256) -> Result<B256, Error> {
        let timeouts = self.ctx.config().timeouts;
        let deadline = Instant::now() + timeouts.confirmation_total;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProviderError::Timeout(timeouts.confirmation_total).into());
            }
            let status = self
                .implementation
                .get_calls_status(&self.ctx, id, timeouts.confirmation_attempt.min(remaining))
                .await?;
            if status.status.is_terminal() {
                return status.transaction_hash().ok_or_else(|| {
                    RpcError::InvalidResponse(format!("receipt of {id} has no transaction")).into()
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(timeouts.polling_interval.min(remaining)).await;
        }
    }

    fn capabilities(&self) -> WalletCapabilities {
        self.ctx
            .config()
            .chains()
            .iter()
            .map(|chain| {
                (
                    quantity::encode_u64(chain.id),
                    ChainCapabilities::new(chain.fee_sponsor.is_some()),
                )
            })
            .collect()
    }

    async fn passthrough(&self, raw: RawRequest) -> Result<Value, Error> {
        if self.ctx.config().passthrough == PassthroughPolicy::Reject {
            return Err(ProviderError::UnsupportedMethod(raw.method).into());
        }
        let clients = self.ctx.clients().get(None)?;
        debug!(method = %raw.method, chain_id = clients.chain_id, "forwarding request");
        let params = raw.params.unwrap_or_else(|| json!([]));
        Ok(clients.rpc.request(&raw.method, params).await?)
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("ctx", &self.ctx)
            .field("listeners", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Provider`].
pub struct ProviderBuilder {
    config: Config,
    implementation: Option<Arc<dyn Implementation>>,
    price: Option<(Arc<dyn PriceSource>, Duration)>,
}

impl ProviderBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            implementation: None,
            price: None,
        }
    }

    /// Execute account operations with `implementation` instead of the
    /// approval queue.
    pub fn implementation(mut self, implementation: Arc<dyn Implementation>) -> Self {
        self.implementation = Some(implementation);
        self
    }

    /// Poll `source` every `interval` for the native token's USD price.
    pub fn price_source(mut self, source: Arc<dyn PriceSource>, interval: Duration) -> Self {
        self.price = Some((source, interval));
        self
    }

    /// Restore persisted state and start background work.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<Provider, Error> {
        let state = hydrate(&self.config).await?;
        let ctx = WalletContext::new(self.config, state);
        let implementation = self
            .implementation
            .unwrap_or_else(|| Arc::new(LocalImplementation::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut teardown = Teardown::noop()
            .subscription(emit_events(&ctx, events.clone()))
            .merge(persist(&ctx));
        teardown = teardown.merge(implementation.setup(&ctx));
        if let Some((source, interval)) = self.price {
            teardown = teardown.merge(PricePoller::new(source, interval).spawn(Arc::clone(ctx.store())));
        }

        info!(instance = %ctx.id(), chain_id = ctx.chain(), "provider created");
        Ok(Provider {
            ctx,
            implementation,
            events,
            teardown: Mutex::new(Some(teardown)),
        })
    }
}

impl std::fmt::Debug for ProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBuilder")
            .field("config", &self.config)
            .field("custom_implementation", &self.implementation.is_some())
            .field("price_source", &self.price.is_some())
            .finish()
    }
}

// ============================================================================
// Lifecycle helpers
// ============================================================================

/// Initial state: persisted accounts and price, and the persisted chain if it
/// is still configured.
async fn hydrate(config: &Config) -> Result<State, Error> {
    let mut state = State::new(config.default_chain());
    let Some(value) = config.storage.get_item(STORE_KEY).await? else {
        return Ok(state);
    };
    match serde_json::from_value::<PersistedState>(value) {
        Ok(persisted) => {
            if config.chain(persisted.chain).is_some() {
                state.chain = persisted.chain;
            }
            state.accounts = persisted.accounts;
            state.price = persisted.price;
            debug!(accounts = state.accounts.len(), chain_id = state.chain, "state restored");
        }
        Err(err) => warn!(error = %err, "ignoring unreadable persisted state"),
    }
    Ok(state)
}

fn emit_events(
    ctx: &WalletContext,
    events: broadcast::Sender<ProviderEvent>,
) -> crate::store::Subscription {
    ctx.store().subscribe(move |prev, next| {
        let before = prev.addresses();
        let after = next.addresses();
        if before != after {
            if before.is_empty() {
                let _ = events.send(ProviderEvent::Connect {
                    chain_id: next.chain,
                });
            }
            let _ = events.send(ProviderEvent::AccountsChanged(after));
        }
        if prev.chain != next.chain {
            let _ = events.send(ProviderEvent::ChainChanged {
                chain_id: next.chain,
            });
        }
    })
}

/// Write `{accounts, chain, price}` to storage whenever it changes.
fn persist(ctx: &WalletContext) -> Teardown {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistedState>();
    let subscription = ctx
        .store()
        .subscribe_selector(State::persisted, move |next, _prev| {
            let _ = tx.send(next.clone());
        });

    let storage = Arc::clone(&ctx.config().storage);
    let task = tokio::spawn(async move {
        while let Some(mut persisted) = rx.recv().await {
            // only the latest snapshot matters
            while let Ok(newer) = rx.try_recv() {
                persisted = newer;
            }
            let result = match serde_json::to_value(&persisted) {
                Ok(value) => storage.set_item(STORE_KEY, value).await.map_err(Error::from),
                Err(err) => Err(err.into()),
            };
            if let Err(err) = result {
                warn!(error = %err, "failed to persist state");
            }
        }
    });

    Teardown::noop().subscription(subscription).task(task)
}

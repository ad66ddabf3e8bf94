//! Approval flows.
//!
//! A queued `eth_requestAccounts` or `wallet_sendCalls` waits until something
//! resolves it. [`LoginFlow`] and [`SendCallsFlow`] are the headless halves of
//! the approval dialogs: a UI (or [`AutoApprover`]) drives them, and they write
//! the outcome back into the queue.
//!
//! | Outcome | Queue entry |
//! |---------|-------------|
//! | Success | completed with the result |
//! | User cancelled | completed with `UserRejected` |
//! | Any other error | left pending; the error is returned so the user can retry |
//! | `dismiss()` or drop | completed with `UserRejected` |

use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::account::passkey::{self, Authenticator, PasskeyServer, RelayPasskeyServer};
use crate::account::session::{AccountSession, Estimate, EstimateState, EstimatorHandle};
use crate::context::{Teardown, WalletContext};
use crate::error::{Error, ProviderError, SigningFailureKind};
use crate::queue::QueuedRequest;
use crate::types::{Account, Method, SendCallsParams};

/// Writes a queue entry's outcome at most once.
struct Resolution {
    ctx: Arc<WalletContext>,
    request_id: u64,
    done: bool,
}

impl Resolution {
    fn new(ctx: &Arc<WalletContext>, request_id: u64) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            request_id,
            done: false,
        }
    }

    fn finish(&mut self, outcome: Result<Value, ProviderError>) {
        if self.done {
            return;
        }
        self.done = true;
        debug!(request_id = self.request_id, ok = outcome.is_ok(), "flow finished");
        self.ctx.queue().complete(self.request_id, outcome);
    }
}

impl Drop for Resolution {
    fn drop(&mut self) {
        self.finish(Err(ProviderError::UserRejected));
    }
}

// ============================================================================
// Login
// ============================================================================

/// Resolves a queued `eth_requestAccounts` with a passkey ceremony.
///
/// Ceremonies take `&mut self`, so one flow runs one at a time. A failed
/// ceremony leaves the flow open for another attempt of either kind.
pub struct LoginFlow {
    resolution: Resolution,
}

impl LoginFlow {
    pub fn new(ctx: &Arc<WalletContext>, request: &QueuedRequest) -> Self {
        Self {
            resolution: Resolution::new(ctx, request.id()),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.resolution.request_id
    }

    /// Whether the queue entry has been resolved.
    pub fn is_finished(&self) -> bool {
        self.resolution.done
    }

    /// Create a new passkey.
    pub async fn register(
        &mut self,
        authenticator: &dyn Authenticator,
        server: &dyn PasskeyServer,
    ) -> Result<Address, Error> {
        let result = passkey::register(&self.resolution.ctx, authenticator, server).await;
        self.settle(result)
    }

    /// Sign in with an existing passkey.
    pub async fn authenticate(
        &mut self,
        authenticator: &dyn Authenticator,
        server: &dyn PasskeyServer,
    ) -> Result<Address, Error> {
        let result = passkey::authenticate(&self.resolution.ctx, authenticator, server).await;
        self.settle(result)
    }

    fn settle(&mut self, result: Result<Account, Error>) -> Result<Address, Error> {
        match result {
            Ok(account) => {
                self.resolution.finish(Ok(json!([account.address])));
                Ok(account.address)
            }
            Err(err) => {
                if err.is_user_rejected() {
                    self.resolution.finish(Err(ProviderError::UserRejected));
                }
                Err(err)
            }
        }
    }

    /// Close without connecting.
    pub fn dismiss(self) {}

    /// Give up, resolving the request with `error`.
    pub fn fail(mut self, error: ProviderError) {
        self.resolution.finish(Err(error));
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("request_id", &self.resolution.request_id)
            .field("finished", &self.resolution.done)
            .finish()
    }
}

// ============================================================================
// Send calls
// ============================================================================

/// Resolves a queued `wallet_sendCalls` by confirming it with the passkey.
pub struct SendCallsFlow {
    resolution: Resolution,
    session: Arc<AccountSession>,
    estimator: Option<EstimatorHandle>,
}

impl SendCallsFlow {
    /// Open a session for the queued request.
    ///
    /// A request that cannot be served (malformed params, unknown account,
    /// missing relay) is resolved with the error right away.
    pub fn open(ctx: &Arc<WalletContext>, request: &QueuedRequest) -> Result<Self, Error> {
        let mut resolution = Resolution::new(ctx, request.id());
        match Self::open_session(ctx, &request.request.params) {
            Ok(session) => Ok(Self {
                resolution,
                session,
                estimator: None,
            }),
            Err(err) => {
                let err = err.into_provider_error();
                warn!(request_id = request.id(), error = %err, "cannot open send-calls flow");
                resolution.finish(Err(err.clone()));
                Err(err.into())
            }
        }
    }

    fn open_session(ctx: &Arc<WalletContext>, params: &Value) -> Result<Arc<AccountSession>, Error> {
        let (params,): (SendCallsParams,) = serde_json::from_value(params.clone())?;
        let from = match params.from {
            Some(from) => from,
            None => ctx
                .store()
                .read(|s| s.accounts.first().map(|a| a.address))
                .ok_or(ProviderError::Disconnected)?,
        };
        AccountSession::open(
            ctx,
            from,
            params.chain_id,
            params.calls,
            params.capabilities.as_ref(),
        )
    }

    pub fn request_id(&self) -> u64 {
        self.resolution.request_id
    }

    pub fn session(&self) -> &Arc<AccountSession> {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.resolution.done
    }

    /// Keep the estimate fresh while the flow is open.
    pub fn start_estimating(&mut self) {
        if self.estimator.is_none() {
            let interval = self.resolution.ctx.config().timeouts.estimate_interval;
            self.estimator = Some(self.session.spawn_estimator(interval));
        }
    }

    /// Estimate now.
    pub async fn estimate(&self) -> Result<Estimate, Error> {
        self.session.refresh().await
    }

    pub fn estimates(&self) -> watch::Receiver<EstimateState> {
        self.session.estimates()
    }

    /// Sign and submit.
    ///
    /// Resolves the request with the operation hash on success. Rejection and
    /// a chain or account that went away resolve it with that error.
    pub async fn confirm(&mut self, authenticator: &dyn Authenticator) -> Result<B256, Error> {
        match self.session.confirm(authenticator).await {
            Ok(hash) => {
                self.estimator = None;
                self.resolution.finish(Ok(json!(hash)));
                Ok(hash)
            }
            Err(err) => {
                if let Some(
                    provider @ (ProviderError::UserRejected
                    | ProviderError::ChainDisconnected
                    | ProviderError::Unauthorized),
                ) = err.as_provider()
                {
                    self.estimator = None;
                    self.resolution.finish(Err(provider.clone()));
                }
                Err(err)
            }
        }
    }

    /// Close without sending.
    pub fn dismiss(self) {}

    /// Give up, resolving the request with `error`.
    pub fn fail(mut self, error: ProviderError) {
        self.resolution.finish(Err(error));
    }
}

impl std::fmt::Debug for SendCallsFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCallsFlow")
            .field("request_id", &self.resolution.request_id)
            .field("session", &self.session)
            .field("estimating", &self.estimator.is_some())
            .finish()
    }
}

// ============================================================================
// Automation
// ============================================================================

/// Which ceremony [`AutoApprover`] runs for `eth_requestAccounts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoginMode {
    Authenticate,
    Register,
    /// Authenticate, and register when the authenticator knows no passkey.
    #[default]
    AuthenticateOrRegister,
}

/// Resolves queued requests without a human.
///
/// Watches the queue and drives [`LoginFlow`] and [`SendCallsFlow`] for every
/// new entry, one at a time, with the given authenticator. Anything else in
/// the queue is resolved with `UnsupportedMethod`.
pub struct AutoApprover {
    authenticator: Arc<dyn Authenticator>,
    server: Option<Arc<dyn PasskeyServer>>,
    login: LoginMode,
}

impl AutoApprover {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            server: None,
            login: LoginMode::default(),
        }
    }

    /// Passkey server to use instead of the active chain's relay.
    pub fn server(mut self, server: Arc<dyn PasskeyServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn login_mode(mut self, mode: LoginMode) -> Self {
        self.login = mode;
        self
    }

    /// Start resolving requests of `ctx`'s queue.
    pub fn spawn(self: Arc<Self>, ctx: &Arc<WalletContext>) -> Teardown {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();

        let subscription = ctx.store().subscribe_selector(
            |s| {
                s.request_queue
                    .iter()
                    .filter(|e| e.is_pending())
                    .map(QueuedRequest::id)
                    .collect::<Vec<_>>()
            },
            {
                let tx = tx.clone();
                move |next: &Vec<u64>, prev: &Vec<u64>| {
                    let seen: HashSet<&u64> = prev.iter().collect();
                    for id in next.iter().filter(|id| !seen.contains(id)) {
                        let _ = tx.send(*id);
                    }
                }
            },
        );
        for entry in ctx.queue().pending() {
            let _ = tx.send(entry.id());
        }

        let ctx = Arc::clone(ctx);
        let task = tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                let Some(entry) = ctx.queue().get(id).filter(QueuedRequest::is_pending) else {
                    continue;
                };
                self.process(&ctx, &entry).await;
            }
        });

        Teardown::noop().subscription(subscription).task(task)
    }

    async fn process(&self, ctx: &Arc<WalletContext>, entry: &QueuedRequest) {
        debug!(request_id = entry.id(), method = entry.method(), "auto approving");
        match Method::from_name(entry.method()) {
            Some(Method::RequestAccounts) => self.login(ctx, entry).await,
            Some(Method::SendCalls) => self.send_calls(ctx, entry).await,
            _ => {
                ctx.queue().complete(
                    entry.id(),
                    Err(ProviderError::UnsupportedMethod(entry.method().to_string())),
                );
            }
        }
    }

    fn passkey_server(&self, ctx: &WalletContext) -> Result<Arc<dyn PasskeyServer>, ProviderError> {
        if let Some(server) = &self.server {
            return Ok(Arc::clone(server));
        }
        let clients = ctx.clients().get(None)?;
        Ok(Arc::new(RelayPasskeyServer::from_relay(clients.relay()?)))
    }

    async fn login(&self, ctx: &Arc<WalletContext>, entry: &QueuedRequest) {
        let mut flow = LoginFlow::new(ctx, entry);
        let server = match self.passkey_server(ctx) {
            Ok(server) => server,
            Err(err) => return flow.fail(err),
        };
        let authenticator = self.authenticator.as_ref();

        let result = match self.login {
            LoginMode::Authenticate => flow.authenticate(authenticator, server.as_ref()).await,
            LoginMode::Register => flow.register(authenticator, server.as_ref()).await,
            LoginMode::AuthenticateOrRegister => {
                match flow.authenticate(authenticator, server.as_ref()).await {
                    Err(err) if is_unknown_credential(&err) => {
                        debug!(request_id = entry.id(), "no passkey found, registering");
                        flow.register(authenticator, server.as_ref()).await
                    }
                    other => other,
                }
            }
        };

        match result {
            Ok(address) => info!(request_id = entry.id(), address = %address, "login approved"),
            Err(err) => {
                warn!(request_id = entry.id(), error = %err, "login failed");
                flow.fail(err.into_provider_error());
            }
        }
    }

    async fn send_calls(&self, ctx: &Arc<WalletContext>, entry: &QueuedRequest) {
        let Ok(mut flow) = SendCallsFlow::open(ctx, entry) else {
            return;
        };
        match flow.confirm(self.authenticator.as_ref()).await {
            Ok(hash) => info!(request_id = entry.id(), hash = %hash, "calls approved"),
            Err(err) => {
                warn!(request_id = entry.id(), error = %err, "send calls failed");
                flow.fail(err.into_provider_error());
            }
        }
    }
}

impl std::fmt::Debug for AutoApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoApprover")
            .field("login", &self.login)
            .field("custom_server", &self.server.is_some())
            .finish()
    }
}

fn is_unknown_credential(err: &Error) -> bool {
    matches!(
        err.as_provider(),
        Some(ProviderError::SigningFailure {
            kind: SigningFailureKind::NotFound,
            ..
        })
    )
}

//! The call lifecycle of one batch.
//!
//! An [`AccountSession`] binds a connected account to the active chain and a
//! list of calls. It estimates the user operation (again and again in the
//! background while the user looks at it), and on confirmation signs the
//! operation hash with the account's passkey and hands it to the relay.
//!
//! ```text
//! open ──► estimate ◄──┐ every estimate_interval, skipped while confirming
//!            │         │
//!            └─────────┘
//!            │
//!         confirm ──► sign ──► eth_sendUserOperation ──► hash
//! ```
//!
//! The session is bound to the chain and account it was opened for. Switching
//! the chain or disconnecting the account aborts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy_core::sol_types::SolValue;
use alloy_primitives::{Address, B256, Bytes, U256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::passkey::{Authenticator, SignRequest};
use super::smart_account::SmartAccount;
use crate::client::{ChainClients, FeeSponsorClient, HttpTransport};
use crate::context::WalletContext;
use crate::error::{Error, ProviderError};
use crate::types::{
    Call, CallsStatus, ChainId, Credential, SendCallsCapabilities, UserOperation,
};

const WEI_PER_ETHER: f64 = 1e18;

/// A priced, ready-to-sign user operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// The operation, carrying a placeholder signature.
    pub user_operation: UserOperation,
    /// Upper bound of the fee, in wei.
    pub cost: U256,
    pub balance: U256,
    pub sponsored: bool,
    pub sufficient_balance: bool,
    /// `cost` in USD, when a price is known.
    pub cost_usd: Option<f64>,
}

/// Latest estimation outcome, published to watchers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EstimateState {
    #[default]
    Pending,
    Ready(Estimate),
    Failed(String),
    /// The chain or account the session was bound to went away.
    Aborted,
}

/// One batch of calls from one account, on one chain.
pub struct AccountSession {
    ctx: Arc<WalletContext>,
    credential: Credential,
    rp_id: Option<String>,
    smart_account: SmartAccount,
    clients: Arc<ChainClients>,
    sponsor: Option<FeeSponsorClient>,
    calls: Vec<Call>,
    estimate: watch::Sender<EstimateState>,
    confirming: AtomicBool,
}

impl AccountSession {
    /// Bind `from` and `calls` to the active chain.
    ///
    /// `requested_chain` is the chain the calls were submitted for. If it is no
    /// longer the active chain the session is refused with `ChainDisconnected`.
    ///
    /// A `paymasterService` capability takes precedence over the fee sponsor
    /// configured for the chain.
    pub fn open(
        ctx: &Arc<WalletContext>,
        from: Address,
        requested_chain: Option<ChainId>,
        calls: Vec<Call>,
        capabilities: Option<&SendCallsCapabilities>,
    ) -> Result<Arc<Self>, Error> {
        let chain_id = ctx.chain();
        if let Some(requested) = requested_chain.filter(|c| *c != chain_id) {
            warn!(requested, active_chain = chain_id, "calls submitted for inactive chain");
            return Err(ProviderError::ChainDisconnected.into());
        }

        let account = ctx
            .store()
            .read(|s| s.account(&from).cloned())
            .ok_or(ProviderError::Unauthorized)?;
        let (credential, rp_id) = account
            .signing_credential()
            .map(|(credential, rp_id)| (credential.clone(), rp_id.map(str::to_string)))
            .ok_or(ProviderError::Unauthorized)?;

        let smart_account =
            SmartAccount::derive(&credential, &ctx.config().account_version, chain_id)?;
        if smart_account.address() != from {
            warn!(address = %from, derived = %smart_account.address(), "credential does not own account");
            return Err(ProviderError::Unauthorized.into());
        }

        let clients = ctx.clients().get(Some(chain_id))?;
        clients.relay()?;

        let sponsor = match capabilities.and_then(|c| c.paymaster_service.as_ref()) {
            Some(service) => Some(FeeSponsorClient::new(
                chain_id,
                smart_account.entry_point(),
                HttpTransport::shared(service.url.clone()),
                service.context.clone(),
            )),
            None => clients.fee_sponsor().cloned(),
        };

        debug!(address = %from, chain_id, calls = calls.len(), sponsored = sponsor.is_some(), "session opened");
        let (estimate, _) = watch::channel(EstimateState::Pending);
        Ok(Arc::new(Self {
            ctx: Arc::clone(ctx),
            credential,
            rp_id,
            smart_account,
            clients,
            sponsor,
            calls,
            estimate,
            confirming: AtomicBool::new(false),
        }))
    }

    pub fn address(&self) -> Address {
        self.smart_account.address()
    }

    pub fn chain_id(&self) -> ChainId {
        self.smart_account.chain_id()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn smart_account(&self) -> &SmartAccount {
        &self.smart_account
    }

    /// Watch estimation results.
    pub fn estimates(&self) -> watch::Receiver<EstimateState> {
        self.estimate.subscribe()
    }

    /// Most recent estimation result.
    pub fn current_estimate(&self) -> EstimateState {
        self.estimate.borrow().clone()
    }

    /// Fails once the chain was switched or the account disconnected.
    pub fn ensure_live(&self) -> Result<(), ProviderError> {
        let (chain, connected) = self.ctx.store().read(|s| {
            (s.chain, s.account(&self.smart_account.address()).is_some())
        });
        if chain != self.smart_account.chain_id() {
            return Err(ProviderError::ChainDisconnected);
        }
        if !connected {
            return Err(ProviderError::Unauthorized);
        }
        Ok(())
    }

    /// Build and price the user operation for the current chain state.
    pub async fn estimate(&self) -> Result<Estimate, Error> {
        let rpc = &self.clients.rpc;
        let relay = self.clients.relay()?;
        let address = self.smart_account.address();

        let nonce_data = rpc
            .call(self.smart_account.entry_point(), self.smart_account.nonce_call())
            .await?;
        let nonce = U256::abi_decode(&nonce_data)?;

        let deployed = !rpc.get_code(address).await?.is_empty();
        let (factory, factory_data) = if deployed {
            (None, None)
        } else {
            (
                Some(self.smart_account.version().meta_factory),
                Some(self.smart_account.factory_data()),
            )
        };

        let balance = rpc.get_balance(address).await?;
        let fees = relay.gas_price().await?.fast;

        let mut op = UserOperation {
            sender: address,
            nonce,
            factory,
            factory_data,
            call_data: self.smart_account.encode_calls(&self.calls),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            signature: self.smart_account.dummy_signature(),
            ..Default::default()
        };

        let stub = match &self.sponsor {
            Some(sponsor) => {
                let stub = sponsor.stub_data(&op).await?;
                stub.apply(&mut op);
                Some(stub)
            }
            None => None,
        };

        relay.estimate_user_operation_gas(&op).await?.apply(&mut op);

        if let (Some(sponsor), Some(stub)) = (&self.sponsor, stub) {
            // paymaster signatures cover the gas limits, so fetch them last
            if !stub.is_final {
                sponsor.sponsor_data(&op).await?.apply(&mut op);
            }
        }

        let cost = op.max_cost();
        let sponsored = op.is_sponsored();
        let price = self.ctx.store().read(|s| s.price);
        let cost_usd = price.and_then(|price| {
            u128::try_from(cost)
                .ok()
                .map(|wei| wei as f64 / WEI_PER_ETHER * price)
        });

        debug!(address = %address, nonce = %nonce, cost = %cost, sponsored, deployed, "estimated user operation");
        Ok(Estimate {
            user_operation: op,
            cost,
            balance,
            sponsored,
            sufficient_balance: sponsored || balance >= cost,
            cost_usd,
        })
    }

    /// Estimate and publish the result.
    pub async fn refresh(&self) -> Result<Estimate, Error> {
        if let Err(err) = self.ensure_live() {
            self.estimate.send_replace(EstimateState::Aborted);
            return Err(err.into());
        }
        match self.estimate().await {
            Ok(estimate) => {
                self.estimate
                    .send_replace(EstimateState::Ready(estimate.clone()));
                Ok(estimate)
            }
            Err(err) => {
                warn!(address = %self.address(), error = %err, "estimation failed");
                self.estimate.send_replace(EstimateState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Re-estimate every `interval` until the session is aborted or the
    /// handle is dropped. Ticks that land during a confirmation are skipped.
    pub fn spawn_estimator(self: &Arc<Self>, interval: Duration) -> EstimatorHandle {
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = session.ensure_live() {
                    debug!(address = %session.address(), error = %err, "session aborted, estimator stopping");
                    session.estimate.send_replace(EstimateState::Aborted);
                    break;
                }
                if session.confirming.load(Ordering::Acquire) {
                    continue;
                }
                let _ = session.refresh().await;
            }
        });
        EstimatorHandle { task }
    }

    /// Sign the estimated operation and submit it, returning its hash.
    ///
    /// Uses the latest estimate, estimating first if there is none. Fails with
    /// [`Error::ConfirmInProgress`] while another confirmation is running.
    pub async fn confirm(&self, authenticator: &dyn Authenticator) -> Result<B256, Error> {
        let _pause = ConfirmGuard::acquire(&self.confirming).ok_or(Error::ConfirmInProgress)?;
        self.ensure_live()?;

        let estimate = match self.current_estimate() {
            EstimateState::Ready(estimate) => estimate,
            _ => self.refresh().await?,
        };
        if !estimate.sufficient_balance {
            return Err(Error::InsufficientBalance {
                required: estimate.cost,
                available: estimate.balance,
            });
        }

        let mut op = estimate.user_operation;
        let hash = op.hash(self.smart_account.entry_point(), self.chain_id());
        let assertion = authenticator
            .sign(&SignRequest {
                challenge: Bytes::copy_from_slice(hash.as_slice()),
                rp_id: self.rp_id.clone(),
                credential_id: Some(self.credential.id.clone()),
            })
            .await?;
        // the user may have switched away while the authenticator was open
        self.ensure_live()?;
        op.signature = self.smart_account.encode_signature(&assertion);

        let relay = self.clients.relay()?;
        let user_op_hash = relay.send_user_operation(&op).await?;
        info!(address = %self.address(), chain_id = self.chain_id(), hash = %user_op_hash, "calls submitted");
        Ok(user_op_hash)
    }
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("address", &self.smart_account.address())
            .field("chain_id", &self.smart_account.chain_id())
            .field("calls", &self.calls.len())
            .field("sponsored", &self.sponsor.is_some())
            .finish()
    }
}

/// Held for the duration of one confirmation. Also pauses the estimator.
struct ConfirmGuard<'a>(&'a AtomicBool);

impl<'a> ConfirmGuard<'a> {
    /// `None` if another confirmation holds the flag.
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConfirmGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Background estimator of a session. Dropping it stops the estimator.
#[must_use = "the estimator stops when the handle is dropped"]
#[derive(Debug)]
pub struct EstimatorHandle {
    task: JoinHandle<()>,
}

impl EstimatorHandle {
    pub fn stop(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for EstimatorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Status of a submitted batch on the active chain.
///
/// Waits up to `timeout` for a receipt; without one the batch is reported as
/// pending (100) rather than failed.
pub async fn calls_status(
    ctx: &WalletContext,
    hash: B256,
    timeout: Duration,
) -> Result<CallsStatus, Error> {
    let clients = ctx.clients().get(None)?;
    let relay = clients.relay()?;
    match relay.wait_for_receipt(hash, timeout).await {
        Ok(receipt) => Ok(CallsStatus::from_receipt(hash, relay.chain_id(), receipt)),
        Err(Error::Provider(ProviderError::Timeout(_))) => {
            debug!(hash = %hash, "no receipt yet, reporting pending");
            Ok(CallsStatus::pending(hash, relay.chain_id()))
        }
        Err(err) => Err(err),
    }
}

//! Where wallet requests are executed.
//!
//! The provider validates requests and keeps the store, and hands the three
//! operations that need an account to an [`Implementation`].
//! [`LocalImplementation`] routes them through the approval queue, so a UI
//! (or an [`AutoApprover`]) decides what happens.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use crate::account::session;
use crate::context::{Teardown, WalletContext};
use crate::error::Error;
use crate::flow::AutoApprover;
use crate::types::{
    Account, Call, CallsStatus, LoadedAccount, Method, SendCallsCapabilities, SendCallsParams,
    TypedRequest,
};

/// Executes the account operations behind the provider.
pub trait Implementation: Send + Sync {
    /// Connect accounts, e.g. by running a passkey ceremony.
    fn load_accounts<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        request: &'a TypedRequest,
    ) -> BoxFuture<'a, Result<Vec<LoadedAccount>, Error>>;

    /// Submit `calls` from `account` on the active chain, returning the
    /// user operation hash.
    fn send_calls<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        account: &'a Account,
        calls: &'a [Call],
        capabilities: Option<&'a SendCallsCapabilities>,
    ) -> BoxFuture<'a, Result<B256, Error>>;

    /// Status of a submitted batch, waiting at most `timeout` for a receipt.
    fn get_calls_status<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        id: B256,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CallsStatus, Error>>;

    /// Start background work. The returned [`Teardown`] stops it.
    fn setup(&self, _ctx: &Arc<WalletContext>) -> Teardown {
        Teardown::noop()
    }
}

/// Routes requests through the approval queue.
#[derive(Debug, Default)]
pub struct LocalImplementation {
    approver: Option<Arc<AutoApprover>>,
}

impl LocalImplementation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve queued requests automatically.
    pub fn with_auto_approver(approver: AutoApprover) -> Self {
        Self {
            approver: Some(Arc::new(approver)),
        }
    }
}

impl Implementation for LocalImplementation {
    fn load_accounts<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        _request: &'a TypedRequest,
    ) -> BoxFuture<'a, Result<Vec<LoadedAccount>, Error>> {
        Box::pin(async move {
            let result = ctx
                .queue()
                .enqueue(Method::RequestAccounts.as_str(), json!([]))
                .await?;
            let addresses: Vec<Address> = serde_json::from_value(result)?;
            debug!(count = addresses.len(), "accounts approved");
            Ok(ctx.store().read(|s| {
                addresses
                    .into_iter()
                    .map(|address| {
                        let key = s.account(&address).and_then(|a| a.key.clone());
                        LoadedAccount::new(address, key)
                    })
                    .collect()
            }))
        })
    }

    fn send_calls<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        account: &'a Account,
        calls: &'a [Call],
        capabilities: Option<&'a SendCallsCapabilities>,
    ) -> BoxFuture<'a, Result<B256, Error>> {
        Box::pin(async move {
            let params = SendCallsParams {
                version: Some("1.0".to_string()),
                chain_id: Some(ctx.chain()),
                from: Some(account.address),
                calls: calls.to_vec(),
                capabilities: capabilities.cloned(),
            };
            let result = ctx
                .queue()
                .enqueue(Method::SendCalls.as_str(), json!([params]))
                .await?;
            let hash: B256 = serde_json::from_value(result)?;
            debug!(address = %account.address, chain_id = ctx.chain(), hash = %hash, "calls approved");
            Ok(hash)
        })
    }

    fn get_calls_status<'a>(
        &'a self,
        ctx: &'a Arc<WalletContext>,
        id: B256,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CallsStatus, Error>> {
        Box::pin(session::calls_status(ctx, id, timeout))
    }

    fn setup(&self, ctx: &Arc<WalletContext>) -> Teardown {
        match &self.approver {
            Some(approver) => Arc::clone(approver).spawn(ctx),
            None => Teardown::noop(),
        }
    }
}

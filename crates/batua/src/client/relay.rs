use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use super::rpc::{self, Transport};
use crate::error::{Error, ProviderError, RpcError};
use crate::types::{
    ChainId, GasEstimate, GasPriceTiers, UserOperation, UserOperationReceipt,
};

/// ERC-4337 bundler ("relay") client for one chain and entry point.
#[derive(Clone)]
pub struct RelayClient {
    chain_id: ChainId,
    entry_point: Address,
    transport: Arc<dyn Transport>,
    polling_interval: Duration,
}

impl RelayClient {
    pub fn new(
        chain_id: ChainId,
        entry_point: Address,
        transport: Arc<dyn Transport>,
        polling_interval: Duration,
    ) -> Self {
        Self {
            chain_id,
            entry_point,
            transport,
            polling_interval,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Gas limits for `op`. The signature only needs the right shape.
    pub async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
    ) -> Result<GasEstimate, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "eth_estimateUserOperationGas",
            json!([op, self.entry_point]),
        )
        .await
    }

    /// Submit a signed operation, returning its hash.
    pub async fn send_user_operation(&self, op: &UserOperation) -> Result<B256, RpcError> {
        let hash: B256 = rpc::call(
            self.transport.as_ref(),
            "eth_sendUserOperation",
            json!([op, self.entry_point]),
        )
        .await?;
        info!(chain_id = self.chain_id, hash = %hash, sender = %op.sender, "user operation submitted");
        Ok(hash)
    }

    /// Receipt of an included operation, `None` while it is not included.
    pub async fn get_user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<UserOperationReceipt>, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "eth_getUserOperationReceipt",
            json!([hash]),
        )
        .await
    }

    /// Fee tiers suggested by the relay.
    pub async fn gas_price(&self) -> Result<GasPriceTiers, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "pimlico_getUserOperationGasPrice",
            json!([]),
        )
        .await
    }

    /// Poll for a receipt until `timeout` elapses.
    ///
    /// Fails with [`ProviderError::Timeout`] when no receipt shows up in time.
    pub async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<UserOperationReceipt, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.get_user_operation_receipt(hash).await? {
                return Ok(receipt);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(hash = %hash, ?timeout, "no receipt yet");
                return Err(ProviderError::Timeout(timeout).into());
            }
            tokio::time::sleep(self.polling_interval.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("chain_id", &self.chain_id)
            .field("entry_point", &self.entry_point)
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

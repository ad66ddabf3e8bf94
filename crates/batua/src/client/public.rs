use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use serde_json::{Value, json};

use super::rpc::{self, Transport};
use crate::error::RpcError;
use crate::types::{ChainId, quantity};

/// Read access to a chain's RPC node.
#[derive(Clone)]
pub struct PublicClient {
    chain_id: ChainId,
    transport: Arc<dyn Transport>,
}

impl PublicClient {
    pub fn new(chain_id: ChainId, transport: Arc<dyn Transport>) -> Self {
        Self {
            chain_id,
            transport,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Forward an arbitrary request to the node.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.transport.request(method, params).await
    }

    /// Chain id reported by the node.
    pub async fn remote_chain_id(&self) -> Result<ChainId, RpcError> {
        let hex: String = rpc::call(self.transport.as_ref(), "eth_chainId", json!([])).await?;
        quantity::parse_u64(&hex).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// Native balance at the latest block.
    pub async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        let hex: String = rpc::call(
            self.transport.as_ref(),
            "eth_getBalance",
            json!([address, "latest"]),
        )
        .await?;
        quantity::parse_u256(&hex).map_err(|e| RpcError::InvalidResponse(e.to_string()))
    }

    /// Deployed bytecode, empty for accounts without code.
    pub async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "eth_getCode",
            json!([address, "latest"]),
        )
        .await
    }

    /// Execute a read-only call against the latest block.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "eth_call",
            json!([{ "to": to, "data": data }, "latest"]),
        )
        .await
    }
}

impl std::fmt::Debug for PublicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicClient")
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

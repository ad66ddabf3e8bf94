//! ERC-7677 fee sponsor ("paymaster") client.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::serde_as;

use super::rpc::{self, Transport};
use crate::error::RpcError;
use crate::types::{ChainId, Quantity, UserOperation, quantity};

/// Paymaster fields returned by `pm_getPaymasterStubData` / `pm_getPaymasterData`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorData {
    pub paymaster: Address,
    #[serde(default)]
    pub paymaster_data: Bytes,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    /// Stub data that is already final; the second round trip can be skipped.
    #[serde(default)]
    pub is_final: bool,
}

impl SponsorData {
    /// Write the paymaster fields into `op`.
    pub fn apply(&self, op: &mut UserOperation) {
        op.paymaster = Some(self.paymaster);
        op.paymaster_data = Some(self.paymaster_data.clone());
        if self.paymaster_verification_gas_limit.is_some() {
            op.paymaster_verification_gas_limit = self.paymaster_verification_gas_limit;
        }
        if self.paymaster_post_op_gas_limit.is_some() {
            op.paymaster_post_op_gas_limit = self.paymaster_post_op_gas_limit;
        }
    }
}

/// Fee sponsor for one chain, with the context configured for it.
#[derive(Clone)]
pub struct FeeSponsorClient {
    chain_id: ChainId,
    entry_point: Address,
    transport: Arc<dyn Transport>,
    context: Option<Value>,
}

impl FeeSponsorClient {
    pub fn new(
        chain_id: ChainId,
        entry_point: Address,
        transport: Arc<dyn Transport>,
        context: Option<Value>,
    ) -> Self {
        Self {
            chain_id,
            entry_point,
            transport,
            context,
        }
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    fn params(&self, op: &UserOperation) -> Value {
        json!([
            op,
            self.entry_point,
            quantity::encode_u64(self.chain_id),
            self.context.clone().unwrap_or_else(|| json!({})),
        ])
    }

    /// Placeholder paymaster fields, used while estimating gas.
    pub async fn stub_data(&self, op: &UserOperation) -> Result<SponsorData, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "pm_getPaymasterStubData",
            self.params(op),
        )
        .await
    }

    /// Final paymaster fields for a fully estimated operation.
    pub async fn sponsor_data(&self, op: &UserOperation) -> Result<SponsorData, RpcError> {
        rpc::call(
            self.transport.as_ref(),
            "pm_getPaymasterData",
            self.params(op),
        )
        .await
    }
}

impl std::fmt::Debug for FeeSponsorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeeSponsorClient")
            .field("chain_id", &self.chain_id)
            .field("context", &self.context)
            .finish()
    }
}

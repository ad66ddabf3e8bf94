//! ERC-4337 v0.7 user operations and the relay's responses.

use alloy_core::sol_types::SolValue;
use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::Quantity;

/// An ERC-4337 v0.7 user operation, in its unpacked RPC form.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    #[serde_as(as = "Quantity")]
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    #[serde_as(as = "Quantity")]
    pub call_gas_limit: U256,
    #[serde_as(as = "Quantity")]
    pub verification_gas_limit: U256,
    #[serde_as(as = "Quantity")]
    pub pre_verification_gas: U256,
    #[serde_as(as = "Quantity")]
    pub max_fee_per_gas: U256,
    #[serde_as(as = "Quantity")]
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

fn pack_u128_pair(high: U256, low: U256) -> B256 {
    let packed: U256 = (high << 128usize) | (low & U256::from(u128::MAX));
    B256::from(packed.to_be_bytes::<32>())
}

fn u128_bytes(value: U256) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&value.to_be_bytes::<32>()[16..]);
    out
}

impl UserOperation {
    /// `factory ‖ factoryData`, empty when the account is already deployed.
    pub fn init_code(&self) -> Vec<u8> {
        match self.factory {
            Some(factory) => {
                let mut out = factory.to_vec();
                if let Some(data) = &self.factory_data {
                    out.extend_from_slice(data);
                }
                out
            }
            None => Vec::new(),
        }
    }

    /// `paymaster ‖ uint128 verificationGas ‖ uint128 postOpGas ‖ paymasterData`.
    pub fn paymaster_and_data(&self) -> Vec<u8> {
        match self.paymaster {
            Some(paymaster) => {
                let mut out = paymaster.to_vec();
                out.extend_from_slice(&u128_bytes(
                    self.paymaster_verification_gas_limit.unwrap_or_default(),
                ));
                out.extend_from_slice(&u128_bytes(
                    self.paymaster_post_op_gas_limit.unwrap_or_default(),
                ));
                if let Some(data) = &self.paymaster_data {
                    out.extend_from_slice(data);
                }
                out
            }
            None => Vec::new(),
        }
    }

    /// The hash the account owner signs, as computed by EntryPoint v0.7.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        let packed = (
            self.sender,
            self.nonce,
            keccak256(self.init_code()),
            keccak256(&self.call_data),
            pack_u128_pair(self.verification_gas_limit, self.call_gas_limit),
            self.pre_verification_gas,
            pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas),
            keccak256(self.paymaster_and_data()),
        )
            .abi_encode();
        keccak256((keccak256(packed), entry_point, U256::from(chain_id)).abi_encode())
    }

    /// Total gas the operation may consume.
    pub fn total_gas(&self) -> U256 {
        self.call_gas_limit
            + self.verification_gas_limit
            + self.pre_verification_gas
            + self.paymaster_verification_gas_limit.unwrap_or_default()
            + self.paymaster_post_op_gas_limit.unwrap_or_default()
    }

    /// Upper bound on what the operation can cost, in wei.
    pub fn max_cost(&self) -> U256 {
        self.total_gas() * self.max_fee_per_gas
    }

    /// Whether a fee sponsor pays for this operation.
    pub fn is_sponsored(&self) -> bool {
        self.paymaster.is_some()
    }
}

/// Result of `eth_estimateUserOperationGas`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    #[serde_as(as = "Quantity")]
    pub pre_verification_gas: U256,
    #[serde_as(as = "Quantity")]
    pub verification_gas_limit: U256,
    #[serde_as(as = "Quantity")]
    pub call_gas_limit: U256,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

impl GasEstimate {
    /// Write the estimated limits into `op`, keeping paymaster limits already set.
    pub fn apply(&self, op: &mut UserOperation) {
        op.pre_verification_gas = self.pre_verification_gas;
        op.verification_gas_limit = self.verification_gas_limit;
        op.call_gas_limit = self.call_gas_limit;
        if self.paymaster_verification_gas_limit.is_some() {
            op.paymaster_verification_gas_limit = self.paymaster_verification_gas_limit;
        }
        if self.paymaster_post_op_gas_limit.is_some() {
            op.paymaster_post_op_gas_limit = self.paymaster_post_op_gas_limit;
        }
    }
}

/// One fee tier.
#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    #[serde_as(as = "Quantity")]
    pub max_fee_per_gas: U256,
    #[serde_as(as = "Quantity")]
    pub max_priority_fee_per_gas: U256,
}

/// Fee tiers returned by `pimlico_getUserOperationGasPrice`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPriceTiers {
    pub slow: GasPrice,
    pub standard: GasPrice,
    pub fast: GasPrice,
}

/// The transaction that included a user operation.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_hash: B256,
    #[serde_as(as = "Quantity")]
    pub block_number: u64,
    #[serde_as(as = "Quantity")]
    pub gas_used: U256,
    #[serde_as(as = "Quantity")]
    pub status: u64,
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,
}

/// Result of `eth_getUserOperationReceipt`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: B256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde_as(as = "Quantity")]
    pub actual_gas_used: U256,
    pub receipt: TransactionReceipt,
}

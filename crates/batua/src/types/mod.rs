//! Core types for batua.
//!
//! This module provides:
//!
//! - [`Quantity`]: hex quantity codec for `serde_with`
//! - [`RawRequest`], [`TypedRequest`]: inbound requests before and after validation
//! - [`Call`], [`UserOperation`]: what gets executed
//! - [`Account`], [`Key`], [`Credential`]: who executes it
//! - [`CallsStatus`], [`StatusCode`]: how it went

mod account;
mod call;
mod capabilities;
mod key;
pub mod quantity;
mod request;
mod status;
mod user_operation;

pub use account::{Account, AccountType, LoadedAccount};
pub use call::Call;
pub use capabilities::{Capability, ChainCapabilities, WalletCapabilities};
pub use key::{Credential, Key, KeyType};
pub use quantity::{ParseQuantityError, Quantity};
pub use request::{
    Method, PaymasterServiceCapability, RawRequest, RpcRequest, SendCallsCapabilities,
    SendCallsParams, SendTransactionParams, TypedRequest,
};
pub use status::{CallsStatus, StatusCode};
pub use user_operation::{
    GasEstimate, GasPrice, GasPriceTiers, TransactionReceipt, UserOperation,
    UserOperationReceipt,
};

/// Numeric EVM chain id.
pub type ChainId = u64;

// Re-export the primitives that appear in public signatures.
pub use alloy_primitives::{Address, B256, Bytes, U256};

//! Inbound requests: the untyped envelope and its decoded form.

use std::fmt;

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::serde_as;

use super::{Call, Quantity};

/// An untyped `{id?, method, params?}` request as handed over by a dApp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RawRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn without_params(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: None,
        }
    }
}

/// A request sitting in the approval queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Methods the provider answers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Accounts,
    ChainId,
    RequestAccounts,
    SendTransaction,
    SendCalls,
    GetCallsStatus,
    GetCapabilities,
    RevokePermissions,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Accounts,
        Method::ChainId,
        Method::RequestAccounts,
        Method::SendTransaction,
        Method::SendCalls,
        Method::GetCallsStatus,
        Method::GetCapabilities,
        Method::RevokePermissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Accounts => "eth_accounts",
            Method::ChainId => "eth_chainId",
            Method::RequestAccounts => "eth_requestAccounts",
            Method::SendTransaction => "eth_sendTransaction",
            Method::SendCalls => "wallet_sendCalls",
            Method::GetCallsStatus => "wallet_getCallsStatus",
            Method::GetCapabilities => "wallet_getCapabilities",
            Method::RevokePermissions => "wallet_revokePermissions",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `eth_sendTransaction` parameters.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionParams {
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    pub from: Address,
    pub to: Address,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl SendTransactionParams {
    /// The transaction as a one-call batch.
    pub fn to_call(&self) -> Call {
        Call {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }
}

/// ERC-7677 paymaster capability requested by a dApp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterServiceCapability {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Capabilities attached to a `wallet_sendCalls` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCallsCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_service: Option<PaymasterServiceCapability>,
}

/// `wallet_sendCalls` parameters.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCallsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub calls: Vec<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<SendCallsCapabilities>,
}

/// A validated request for one of the methods in [`Method`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedRequest {
    Accounts,
    ChainId,
    RequestAccounts,
    SendTransaction(SendTransactionParams),
    SendCalls(SendCallsParams),
    GetCallsStatus(B256),
    GetCapabilities(Option<Address>),
    RevokePermissions(Option<Value>),
}

impl TypedRequest {
    pub fn method(&self) -> Method {
        match self {
            TypedRequest::Accounts => Method::Accounts,
            TypedRequest::ChainId => Method::ChainId,
            TypedRequest::RequestAccounts => Method::RequestAccounts,
            TypedRequest::SendTransaction(_) => Method::SendTransaction,
            TypedRequest::SendCalls(_) => Method::SendCalls,
            TypedRequest::GetCallsStatus(_) => Method::GetCallsStatus,
            TypedRequest::GetCapabilities(_) => Method::GetCapabilities,
            TypedRequest::RevokePermissions(_) => Method::RevokePermissions,
        }
    }

    /// Encode back into the wire envelope.
    pub fn to_raw(&self) -> Result<RawRequest, serde_json::Error> {
        let method = self.method().as_str();
        let params = match self {
            TypedRequest::Accounts | TypedRequest::ChainId | TypedRequest::RequestAccounts => {
                return Ok(RawRequest::without_params(method));
            }
            TypedRequest::SendTransaction(p) => json!([serde_json::to_value(p)?]),
            TypedRequest::SendCalls(p) => json!([serde_json::to_value(p)?]),
            TypedRequest::GetCallsStatus(hash) => json!([hash]),
            TypedRequest::GetCapabilities(Some(address)) => json!([address]),
            TypedRequest::GetCapabilities(None) => json!([]),
            TypedRequest::RevokePermissions(Some(p)) => json!([p]),
            TypedRequest::RevokePermissions(None) => json!([]),
        };
        Ok(RawRequest::new(method, params))
    }
}

//! Error types for batua.
//!
//! # Error Hierarchy
//!
//! - [`Error`](enum@Error): Main error type, returned by most operations
//!   - [`ProviderError`]: The wallet-facing taxonomy (EIP-1193 codes)
//!   - [`RpcError`]: Transport failures (HTTP, JSON-RPC error objects, etc.)
//!   - [`StorageError`]: Persistence backend failures
//!
//! Every error maps to a numeric code through [`Error::code`], so a dApp-facing
//! bridge can always build a `{code, message}` error object.
//!
//! ```rust
//! use batua::{Error, ProviderError};
//!
//! fn describe(err: &Error) -> String {
//!     match err {
//!         Error::Provider(ProviderError::UserRejected) => "cancelled".to_string(),
//!         other => format!("failed with code {}", other.code()),
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a credential ceremony or signature failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SigningFailureKind {
    /// The server does not know the presented credential.
    NotFound,
    /// The server rejected the credential or assertion.
    InvalidSignature,
    /// Anything else.
    Generic,
}

impl fmt::Display for SigningFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningFailureKind::NotFound => write!(f, "not found"),
            SigningFailureKind::InvalidSignature => write!(f, "invalid signature"),
            SigningFailureKind::Generic => write!(f, "generic"),
        }
    }
}

/// Wallet-facing errors.
///
/// These are the errors a dApp can match on. They are `Clone` so they can be
/// written into a queued request and delivered to the waiting caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    // ─── EIP-1193 ───
    #[error("User rejected the request")]
    UserRejected,

    #[error("The requested account and/or method has not been authorized by the user")]
    Unauthorized,

    #[error("Method '{0}' is not supported")]
    UnsupportedMethod(String),

    #[error("The provider is disconnected from all chains")]
    Disconnected,

    #[error("The provider is not connected to the requested chain")]
    ChainDisconnected,

    // ─── JSON-RPC ───
    #[error("Invalid params for {method} at '{path}': {message}")]
    InvalidParams {
        method: String,
        path: String,
        value: Option<serde_json::Value>,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Signing failed ({kind}): {message}")]
    SigningFailure {
        kind: SigningFailureKind,
        message: String,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// An error carried through the request queue that has no dedicated variant.
    #[error("{message} (code: {code})")]
    Internal { code: i64, message: String },
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
    pub const CONFIGURATION: i64 = -32002;
    pub const SIGNING_FAILURE: i64 = -32003;
    pub const TIMEOUT: i64 = -32004;

    /// Numeric code of this error.
    pub fn code(&self) -> i64 {
        match self {
            ProviderError::UserRejected => Self::USER_REJECTED,
            ProviderError::Unauthorized => Self::UNAUTHORIZED,
            ProviderError::UnsupportedMethod(_) => Self::UNSUPPORTED_METHOD,
            ProviderError::Disconnected => Self::DISCONNECTED,
            ProviderError::ChainDisconnected => Self::CHAIN_DISCONNECTED,
            ProviderError::InvalidParams { .. } => Self::INVALID_PARAMS,
            ProviderError::Configuration(_) => Self::CONFIGURATION,
            ProviderError::SigningFailure { .. } => Self::SIGNING_FAILURE,
            ProviderError::Timeout(_) => Self::TIMEOUT,
            ProviderError::Internal { code, .. } => *code,
        }
    }

    /// Create an invalid params error.
    pub fn invalid_params(
        method: impl Into<String>,
        path: impl Into<String>,
        value: Option<serde_json::Value>,
        message: impl Into<String>,
    ) -> Self {
        ProviderError::InvalidParams {
            method: method.into(),
            path: path.into(),
            value,
            message: message.into(),
        }
    }

    /// Create a signing failure.
    pub fn signing(kind: SigningFailureKind, message: impl Into<String>) -> Self {
        ProviderError::SigningFailure {
            kind,
            message: message.into(),
        }
    }

    /// Build the `{code, message, data?}` object handed back to dApps.
    pub fn to_error_object(&self) -> ErrorObject {
        let data = match self {
            ProviderError::InvalidParams {
                method,
                path,
                value,
                ..
            } => Some(serde_json::json!({
                "method": method,
                "path": path,
                "value": value,
            })),
            ProviderError::SigningFailure { kind, .. } => {
                Some(serde_json::json!({ "reason": kind }))
            }
            _ => None,
        };
        ErrorObject {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

/// EIP-1193 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// RPC-specific errors.
#[derive(Debug, Error)]
pub enum RpcError {
    // ─── Network/Transport ───
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {message}")]
    Network {
        message: String,
        status_code: Option<u16>,
        retryable: bool,
    },

    #[error("Timeout after {0} retries")]
    Timeout(u32),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // ─── JSON-RPC error object ───
    #[error("RPC error: {message} (code: {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl RpcError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Http(e) => e.is_timeout() || e.is_connect(),
            RpcError::Timeout(_) => true,
            RpcError::Network { retryable, .. } => *retryable,
            // -32005 is the conventional "limit exceeded" code
            RpcError::Rpc { code, .. } => *code == -32005,
            _ => false,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>, status_code: Option<u16>, retryable: bool) -> Self {
        RpcError::Network {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a JSON-RPC error.
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        RpcError::Rpc {
            code,
            message: message.into(),
            data,
        }
    }

    /// Message carried by a JSON-RPC error object, if this is one.
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            RpcError::Rpc { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Persistence backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Main error type for batua operations.
#[derive(Debug, Error)]
pub enum Error {
    // ─── Wrapped errors ───
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    // ─── Call lifecycle ───
    #[error("Insufficient balance: required {required} wei, available {available} wei")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("A confirmation is already in progress for this session")]
    ConfirmInProgress,

    // ─── Encoding ───
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI error: {0}")]
    Abi(#[from] alloy_core::sol_types::Error),
}

impl Error {
    /// Numeric code of this error.
    pub fn code(&self) -> i64 {
        match self {
            Error::Provider(e) => e.code(),
            Error::Rpc(RpcError::Rpc { code, .. }) => *code,
            _ => ProviderError::INTERNAL,
        }
    }

    /// The wallet-facing error, if this is one.
    pub fn as_provider(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the user (or automation acting for them) declined.
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Error::Provider(ProviderError::UserRejected))
    }

    /// Flatten into a [`ProviderError`] so it can be carried through the queue.
    pub fn into_provider_error(self) -> ProviderError {
        match self {
            Error::Provider(e) => e,
            other => ProviderError::Internal {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

//! Batched-call status (`wallet_getCallsStatus`).

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::Quantity;
use super::user_operation::{TransactionReceipt, UserOperationReceipt};

/// Status code of a call batch.
///
/// `1xx` is provisional, `2xx` confirmed, `4xx` offchain failure and `5xx`
/// an included batch that reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const PENDING: StatusCode = StatusCode(100);
    pub const CONFIRMED: StatusCode = StatusCode(200);
    pub const REVERTED: StatusCode = StatusCode(500);

    /// Map a user-operation receipt onto a status code.
    pub fn from_receipt(receipt: Option<&UserOperationReceipt>) -> Self {
        match receipt {
            None => StatusCode::PENDING,
            Some(r) if r.success => StatusCode::CONFIRMED,
            Some(_) => StatusCode::REVERTED,
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.0 >= 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_failure(&self) -> bool {
        self.0 >= 400
    }
}

/// Response of `wallet_getCallsStatus`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallsStatus {
    pub id: B256,
    pub version: String,
    #[serde_as(as = "Quantity")]
    pub chain_id: u64,
    pub status: StatusCode,
    pub atomic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts: Option<Vec<TransactionReceipt>>,
}

impl CallsStatus {
    pub const VERSION: &'static str = "1.0";

    /// A batch the relay has not reported on yet.
    pub fn pending(id: B256, chain_id: u64) -> Self {
        Self {
            id,
            version: Self::VERSION.to_string(),
            chain_id,
            status: StatusCode::PENDING,
            atomic: true,
            receipts: None,
        }
    }

    /// Status derived from a relay receipt.
    pub fn from_receipt(id: B256, chain_id: u64, receipt: UserOperationReceipt) -> Self {
        Self {
            id,
            version: Self::VERSION.to_string(),
            chain_id,
            status: StatusCode::from_receipt(Some(&receipt)),
            atomic: true,
            receipts: Some(vec![receipt.receipt]),
        }
    }

    /// Hash of the transaction that included the batch.
    pub fn transaction_hash(&self) -> Option<B256> {
        self.receipts
            .as_ref()
            .and_then(|r| r.first())
            .map(|r| r.transaction_hash)
    }
}

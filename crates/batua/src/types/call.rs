use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::Quantity;

/// A single contract invocation. Several calls are batched into one user operation
/// and execute atomically.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub to: Address,
    #[serde_as(as = "Option<Quantity>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

impl Call {
    /// Create a call with no value and no calldata.
    pub fn new(to: Address) -> Self {
        Self {
            to,
            value: None,
            data: None,
        }
    }

    /// Attach a native value.
    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach calldata.
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Native value, zero when absent.
    pub fn value_or_zero(&self) -> U256 {
        self.value.unwrap_or_default()
    }

    /// Calldata, empty when absent.
    pub fn data_or_empty(&self) -> Bytes {
        self.data.clone().unwrap_or_default()
    }
}

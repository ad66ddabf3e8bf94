use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single capability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub supported: bool,
}

/// Capabilities of the wallet on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCapabilities {
    pub atomic_batch: Capability,
    pub paymaster_service: Capability,
}

impl ChainCapabilities {
    pub fn new(sponsored: bool) -> Self {
        Self {
            atomic_batch: Capability { supported: true },
            paymaster_service: Capability {
                supported: sponsored,
            },
        }
    }
}

/// `wallet_getCapabilities` response, keyed by hex chain id.
pub type WalletCapabilities = BTreeMap<String, ChainCapabilities>;

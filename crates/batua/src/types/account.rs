use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use super::key::{Credential, Key};

/// Kind of account managed by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "smartAccount")]
    SmartAccount,
}

/// A connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub name: String,
}

impl Account {
    pub fn smart_account(address: Address, key: Option<Key>, name: impl Into<String>) -> Self {
        Self {
            address,
            key,
            account_type: AccountType::SmartAccount,
            name: name.into(),
        }
    }

    /// The credential able to sign for this account, if any.
    pub fn signing_credential(&self) -> Option<(&Credential, Option<&str>)> {
        self.key.as_ref().and_then(Key::credential)
    }
}

/// An account reported by an implementation's loader, before it gets a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAccount {
    pub address: Address,
    pub key: Option<Key>,
}

impl LoadedAccount {
    pub fn new(address: Address, key: Option<Key>) -> Self {
        Self { address, key }
    }

    /// Promote to a full account, labelled with a shortened address.
    pub fn into_account(self) -> Account {
        let hex = self.address.to_string();
        let name = format!("{}…{}", &hex[..6], &hex[hex.len() - 4..]);
        Account::smart_account(self.address, self.key, name)
    }
}

//! Signing keys attached to accounts.

use alloy_primitives::{B256, Bytes, U256, keccak256};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A WebAuthn public-key credential as reported by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Credential id, base64url encoded.
    pub id: String,
    /// Uncompressed P-256 public key: `x ‖ y`, optionally prefixed with `0x04`.
    pub public_key: Bytes,
}

impl Credential {
    pub fn new(id: impl Into<String>, public_key: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            public_key: public_key.into(),
        }
    }

    /// Raw credential id bytes.
    ///
    /// Ids that are not valid base64url are used verbatim.
    pub fn id_bytes(&self) -> Vec<u8> {
        let trimmed = self.id.trim_end_matches('=');
        URL_SAFE_NO_PAD
            .decode(trimmed)
            .unwrap_or_else(|_| self.id.as_bytes().to_vec())
    }

    /// `keccak256` of the raw credential id.
    pub fn authenticator_id_hash(&self) -> B256 {
        keccak256(self.id_bytes())
    }

    /// Affine coordinates of the public key.
    pub fn coordinates(&self) -> Result<(U256, U256), ProviderError> {
        let raw: &[u8] = match self.public_key.len() {
            64 => &self.public_key,
            65 if self.public_key[0] == 0x04 => &self.public_key[1..],
            len => {
                return Err(ProviderError::signing(
                    crate::error::SigningFailureKind::Generic,
                    format!("unsupported public key length {len}"),
                ));
            }
        };
        Ok((
            U256::from_be_slice(&raw[..32]),
            U256::from_be_slice(&raw[32..]),
        ))
    }
}

/// Key algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "webauthn-p256")]
    WebAuthnP256,
}

/// A key attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Key {
    /// A passkey held by the platform authenticator.
    #[serde(rename = "passkey", rename_all = "camelCase")]
    Passkey {
        credential: Credential,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rp_id: Option<String>,
    },
    /// A key known by type only. It cannot sign.
    #[serde(rename = "readOnly", rename_all = "camelCase")]
    ReadOnly { key_type: KeyType },
}

impl Key {
    pub fn passkey(credential: Credential, rp_id: Option<String>) -> Self {
        Key::Passkey { credential, rp_id }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Passkey { .. } => KeyType::WebAuthnP256,
            Key::ReadOnly { key_type } => *key_type,
        }
    }

    /// Whether this key can produce signatures.
    pub fn can_sign(&self) -> bool {
        matches!(self, Key::Passkey { .. })
    }

    /// Credential and relying-party id of a signing key.
    pub fn credential(&self) -> Option<(&Credential, Option<&str>)> {
        match self {
            Key::Passkey { credential, rp_id } => Some((credential, rp_id.as_deref())),
            Key::ReadOnly { .. } => None,
        }
    }

    /// The same key with its signing capability removed.
    pub fn to_read_only(&self) -> Key {
        Key::ReadOnly {
            key_type: self.key_type(),
        }
    }
}

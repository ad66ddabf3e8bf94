//! Passkey ceremonies.
//!
//! Two collaborators take part in every ceremony:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`Authenticator`] | The platform authenticator: creates credentials and signs challenges |
//! | [`PasskeyServer`] | Issues challenges and verifies the results ([`RelayPasskeyServer`] speaks `pks_*`) |
//!
//! [`register`] and [`authenticate`] drive them and connect the resulting
//! smart account. Failures are mapped onto one taxonomy: a cancelled
//! authenticator is [`ProviderError::UserRejected`], everything else is a
//! [`ProviderError::SigningFailure`] whose kind tells rejection, unknown
//! credential and other errors apart.

use std::sync::Arc;

use alloy_primitives::{Bytes, U256};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use futures::future::BoxFuture;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::serde_as;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::smart_account::SmartAccount;
use crate::client::{RelayClient, Transport, rpc};
use crate::context::WalletContext;
use crate::error::{Error, ProviderError, RpcError, SigningFailureKind};
use crate::types::{Account, Credential, Key, Quantity};

// ============================================================================
// Ceremony payloads
// ============================================================================

/// Credential creation options issued by the server. Passed to the
/// authenticator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationOptions(pub Value);

impl RegistrationOptions {
    /// Relying party the credential will be scoped to.
    pub fn rp_id(&self) -> Option<String> {
        self.0
            .get("rp")
            .and_then(|rp| rp.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// A freshly created credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCredential {
    pub id: String,
    pub public_key: Bytes,
    /// Attestation response, forwarded to the server for verification.
    #[serde(default)]
    pub response: Value,
}

/// Authentication challenge issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationChallenge {
    /// Server-side handle of this challenge.
    pub uuid: String,
    /// Challenge, base64url encoded.
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_id: Option<String>,
}

impl AuthenticationChallenge {
    pub fn challenge_bytes(&self) -> Bytes {
        URL_SAFE_NO_PAD
            .decode(self.challenge.trim_end_matches('='))
            .unwrap_or_else(|_| self.challenge.as_bytes().to_vec())
            .into()
    }
}

/// What to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub challenge: Bytes,
    pub rp_id: Option<String>,
    /// Restrict signing to this credential.
    pub credential_id: Option<String>,
}

/// A WebAuthn assertion with its P-256 signature split into `(r, s)`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnAssertion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    pub authenticator_data: Bytes,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde_as(as = "Quantity")]
    pub r: U256,
    #[serde_as(as = "Quantity")]
    pub s: U256,
}

/// Result of a server-side verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCredential {
    pub success: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub public_key: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

// ============================================================================
// Collaborators
// ============================================================================

/// Platform authenticator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthenticatorError {
    #[error("The operation was cancelled")]
    Cancelled,

    #[error("Authenticator failed: {0}")]
    Failed(String),
}

impl From<AuthenticatorError> for ProviderError {
    fn from(err: AuthenticatorError) -> Self {
        match err {
            AuthenticatorError::Cancelled => ProviderError::UserRejected,
            AuthenticatorError::Failed(message) => {
                ProviderError::signing(SigningFailureKind::Generic, message)
            }
        }
    }
}

impl From<AuthenticatorError> for Error {
    fn from(err: AuthenticatorError) -> Self {
        Error::Provider(err.into())
    }
}

/// The platform authenticator.
pub trait Authenticator: Send + Sync {
    /// Create a new credential.
    fn create_credential<'a>(
        &'a self,
        options: &'a RegistrationOptions,
    ) -> BoxFuture<'a, Result<RegistrationCredential, AuthenticatorError>>;

    /// Sign a challenge with an existing credential.
    fn sign<'a>(
        &'a self,
        request: &'a SignRequest,
    ) -> BoxFuture<'a, Result<WebAuthnAssertion, AuthenticatorError>>;
}

/// Server side of the ceremonies.
pub trait PasskeyServer: Send + Sync {
    fn start_registration<'a>(
        &'a self,
        user_name: &'a str,
    ) -> BoxFuture<'a, Result<RegistrationOptions, Error>>;

    fn verify_registration<'a>(
        &'a self,
        credential: &'a RegistrationCredential,
        user_name: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedCredential, Error>>;

    fn start_authentication(&self) -> BoxFuture<'_, Result<AuthenticationChallenge, Error>>;

    fn verify_authentication<'a>(
        &'a self,
        assertion: &'a WebAuthnAssertion,
        uuid: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedCredential, Error>>;
}

/// Passkey server reached through the relay's `pks_*` methods.
#[derive(Clone)]
pub struct RelayPasskeyServer {
    transport: Arc<dyn Transport>,
}

impl RelayPasskeyServer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn from_relay(relay: &RelayClient) -> Self {
        Self::new(Arc::clone(relay.transport()))
    }
}

impl PasskeyServer for RelayPasskeyServer {
    fn start_registration<'a>(
        &'a self,
        user_name: &'a str,
    ) -> BoxFuture<'a, Result<RegistrationOptions, Error>> {
        Box::pin(async move {
            Ok(rpc::call(
                self.transport.as_ref(),
                "pks_startRegistration",
                json!([{ "context": { "userName": user_name } }]),
            )
            .await?)
        })
    }

    fn verify_registration<'a>(
        &'a self,
        credential: &'a RegistrationCredential,
        user_name: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedCredential, Error>> {
        Box::pin(async move {
            Ok(rpc::call(
                self.transport.as_ref(),
                "pks_verifyRegistration",
                json!([credential, { "userName": user_name }]),
            )
            .await?)
        })
    }

    fn start_authentication(&self) -> BoxFuture<'_, Result<AuthenticationChallenge, Error>> {
        Box::pin(async move {
            Ok(rpc::call(
                self.transport.as_ref(),
                "pks_startAuthentication",
                json!([]),
            )
            .await?)
        })
    }

    fn verify_authentication<'a>(
        &'a self,
        assertion: &'a WebAuthnAssertion,
        uuid: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedCredential, Error>> {
        Box::pin(async move {
            Ok(rpc::call(
                self.transport.as_ref(),
                "pks_verifyAuthentication",
                json!([assertion, uuid]),
            )
            .await?)
        })
    }
}

impl std::fmt::Debug for RelayPasskeyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPasskeyServer").finish_non_exhaustive()
    }
}

// ============================================================================
// Ceremonies
// ============================================================================

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "eager", "gentle", "happy", "jolly", "kind", "lucky", "mighty",
    "nimble", "proud", "quiet", "swift", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "comet", "falcon", "fox", "harbor", "lynx", "maple", "meadow", "otter", "panda",
    "pebble", "raven", "river", "tiger", "willow", "zebra",
];

/// A random `adjective_noun` display name.
pub fn generate_user_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("brave");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
    format!("{adjective}_{noun}")
}

/// Map a server-side failure onto the signing taxonomy.
fn classify(err: Error) -> Error {
    if matches!(err, Error::Provider(_)) {
        return err;
    }
    let (kind, message) = match &err {
        Error::Rpc(RpcError::Rpc { message, .. }) => {
            let lower = message.to_lowercase();
            let kind = if lower.contains("not found") {
                SigningFailureKind::NotFound
            } else if lower.contains("signature") || lower.contains("verif") {
                SigningFailureKind::InvalidSignature
            } else {
                SigningFailureKind::Generic
            };
            (kind, message.clone())
        }
        other => (SigningFailureKind::Generic, other.to_string()),
    };
    warn!(%kind, %message, "passkey ceremony failed");
    ProviderError::signing(kind, message).into()
}

fn rejected_verification() -> Error {
    ProviderError::signing(
        SigningFailureKind::InvalidSignature,
        "the passkey server rejected the credential",
    )
    .into()
}

/// Create a new passkey and connect the smart account it owns.
pub async fn register(
    ctx: &WalletContext,
    authenticator: &dyn Authenticator,
    server: &dyn PasskeyServer,
) -> Result<Account, Error> {
    let user_name = generate_user_name();
    debug!(%user_name, "starting passkey registration");

    let options = server
        .start_registration(&user_name)
        .await
        .map_err(classify)?;
    let credential = authenticator.create_credential(&options).await?;
    let verified = server
        .verify_registration(&credential, &user_name)
        .await
        .map_err(classify)?;
    if !verified.success {
        return Err(rejected_verification());
    }

    connect(
        ctx,
        Credential::new(credential.id, credential.public_key),
        options.rp_id(),
        user_name,
    )
}

/// Sign in with an existing passkey and connect the smart account it owns.
pub async fn authenticate(
    ctx: &WalletContext,
    authenticator: &dyn Authenticator,
    server: &dyn PasskeyServer,
) -> Result<Account, Error> {
    let challenge = server.start_authentication().await.map_err(classify)?;
    debug!(uuid = %challenge.uuid, "starting passkey authentication");

    let assertion = authenticator
        .sign(&SignRequest {
            challenge: challenge.challenge_bytes(),
            rp_id: challenge.rp_id.clone(),
            credential_id: None,
        })
        .await?;
    let verified = server
        .verify_authentication(&assertion, &challenge.uuid)
        .await
        .map_err(classify)?;
    if !verified.success {
        return Err(rejected_verification());
    }

    let name = verified.user_name.unwrap_or_else(generate_user_name);
    connect(
        ctx,
        Credential::new(verified.id, verified.public_key),
        challenge.rp_id,
        name,
    )
}

/// Derive the account for `credential` on the active chain and add it to the store.
fn connect(
    ctx: &WalletContext,
    credential: Credential,
    rp_id: Option<String>,
    name: String,
) -> Result<Account, Error> {
    let chain_id = ctx.store().read(|s| s.chain);
    let smart_account = SmartAccount::derive(&credential, &ctx.config().account_version, chain_id)?;
    let account = Account::smart_account(
        smart_account.address(),
        Some(Key::passkey(credential, rp_id)),
        name,
    );

    ctx.store().update(|state| {
        if state.account(&account.address).is_none() {
            state.accounts.push(account.clone());
        }
    });
    info!(address = %account.address, chain_id, name = %account.name, "passkey account connected");
    Ok(account)
}

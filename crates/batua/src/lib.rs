//! An embedded passkey wallet provider for EVM smart accounts.
//!
//! **batua** sits next to a dApp and answers EIP-1193 style requests
//! (connect, send calls, check status) without a browser extension. Accounts
//! are ERC-4337 smart accounts owned by a WebAuthn passkey.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batua::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), batua::Error> {
//!     // Configure once
//!     let config = Config::builder()
//!         .dapp_name("Example dApp")
//!         .chain(ChainConfig::sepolia())
//!         .build()?;
//!     let provider = Provider::create(config).await?;
//!
//!     // Connect: waits until a login flow resolves the queued request
//!     let accounts = provider
//!         .request(RawRequest::new("eth_requestAccounts", json!([])))
//!         .await?;
//!     println!("Accounts: {}", accounts);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Design Principles
//!
//! 1. **Single entry point**: every request goes through [`Provider::request`]
//! 2. **Validate first**: malformed params fail before anything is queued
//! 3. **Human in the loop**: account operations wait in a [`RequestQueue`] until a
//!    [`LoginFlow`] or [`SendCallsFlow`] (or an [`AutoApprover`]) resolves them
//! 4. **One source of truth**: the [`Store`] holds accounts, chain and queue; events and
//!    persistence are derived from it
//!
//! # Resolving Requests
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batua::*;
//!
//! # async fn example(provider: &Provider, authenticator: Arc<dyn Authenticator>) -> Result<(), batua::Error> {
//! let ctx = provider.context();
//! for request in ctx.queue().pending() {
//!     if request.method() == "eth_requestAccounts" {
//!         let server = RelayPasskeyServer::from_relay(ctx.clients().get(None)?.relay()?);
//!         let mut flow = LoginFlow::new(ctx, &request);
//!         flow.register(authenticator.as_ref(), &server).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod implementation;
pub mod price;
pub mod provider;
pub mod queue;
pub mod schema;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{Error, ProviderError, RpcError, SigningFailureKind, StorageError};
pub use types::*;

pub use account::{
    AccountSession, AccountVersion, Authenticator, AuthenticatorError, Estimate, EstimateState,
    KERNEL_V3_1, PasskeyServer, RelayPasskeyServer, SmartAccount, WebAuthnAssertion,
};
pub use client::{HttpTransport, RetryConfig, Transport};
pub use config::{ChainConfig, Config, ConfigBuilder, PassthroughPolicy, Timeouts};
pub use context::{Teardown, WalletContext};
pub use flow::{AutoApprover, LoginFlow, LoginMode, SendCallsFlow};
pub use implementation::{Implementation, LocalImplementation};
pub use price::{PricePoller, PriceSource, StaticPrice};
pub use provider::{Provider, ProviderBuilder, ProviderEvent};
pub use queue::{PendingRequest, QueueStatus, QueuedRequest, RequestQueue};
pub use storage::{MemoryStorage, STORE_KEY, Storage};
#[cfg(feature = "file-storage")]
pub use storage::FileStorage;
pub use store::{State, Store, Subscription};

//! Chain clients.
//!
//! - [`Transport`]: anything that answers JSON-RPC; [`HttpTransport`] is the stock one
//! - [`PublicClient`]: reads from the chain's RPC node
//! - [`RelayClient`]: ERC-4337 bundler: estimation, submission, receipts
//! - [`FeeSponsorClient`]: ERC-7677 paymaster
//! - [`ClientCache`]: one lazily built [`ChainClients`] set per chain

mod cache;
mod public;
mod relay;
pub mod rpc;
mod sponsor;

pub use cache::{ChainClients, ClientCache};
pub use public::PublicClient;
pub use relay::RelayClient;
pub use rpc::{HttpTransport, RetryConfig, Transport};
pub use sponsor::{FeeSponsorClient, SponsorData};

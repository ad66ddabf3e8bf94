//! Wallet configuration.
//!
//! ```rust
//! use batua::{ChainConfig, Config, PassthroughPolicy};
//!
//! let config = Config::builder()
//!     .dapp_name("Example dApp")
//!     .chain(ChainConfig::sepolia())
//!     .chain(
//!         ChainConfig::new(84532, "Base Sepolia")
//!             .rpc_url("https://sepolia.base.org")
//!             .relay_url("https://public.pimlico.io/v2/84532/rpc"),
//!     )
//!     .passthrough(PassthroughPolicy::Reject)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.default_chain(), 11_155_111);
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::account::{AccountVersion, KERNEL_V3_1};
use crate::client::{HttpTransport, Transport};
use crate::error::ProviderError;
use crate::storage::{MemoryStorage, Storage};
use crate::types::ChainId;

/// What to do with requests the wallet does not handle itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassthroughPolicy {
    /// Forward them to the active chain's RPC node.
    #[default]
    Forward,
    /// Fail them with `UnsupportedMethod`.
    Reject,
}

/// Timeouts and intervals used by the call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait per `wallet_getCallsStatus` request.
    pub status_poll: Duration,
    /// Wait per status attempt inside `eth_sendTransaction`.
    pub confirmation_attempt: Duration,
    /// Overall wait of `eth_sendTransaction`.
    pub confirmation_total: Duration,
    /// Re-estimation period of an open send-calls session.
    pub estimate_interval: Duration,
    /// Receipt polling period.
    pub polling_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status_poll: Duration::from_secs(1),
            confirmation_attempt: Duration::from_secs(60),
            confirmation_total: Duration::from_secs(180),
            estimate_interval: Duration::from_secs(10),
            polling_interval: Duration::from_secs(1),
        }
    }
}

/// ERC-7677 fee sponsor of a chain.
#[derive(Clone)]
pub struct FeeSponsorConfig {
    pub transport: Arc<dyn Transport>,
    /// Sponsor-specific context, e.g. a sponsorship policy id.
    pub context: Option<Value>,
}

/// One supported chain.
#[derive(Clone)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub rpc: Option<Arc<dyn Transport>>,
    pub relay: Option<Arc<dyn Transport>>,
    pub fee_sponsor: Option<FeeSponsorConfig>,
}

impl ChainConfig {
    pub fn new(id: ChainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rpc: None,
            relay: None,
            fee_sponsor: None,
        }
    }

    /// Sepolia through Pimlico's public endpoint.
    pub fn sepolia() -> Self {
        Self::pimlico_public(11_155_111, "Sepolia")
    }

    /// Base Sepolia through Pimlico's public endpoint.
    pub fn base_sepolia() -> Self {
        Self::pimlico_public(84_532, "Base Sepolia")
    }

    fn pimlico_public(id: ChainId, name: &str) -> Self {
        let transport = HttpTransport::shared(format!("https://public.pimlico.io/v2/{id}/rpc"));
        Self::new(id, name)
            .rpc(Arc::clone(&transport))
            .relay(transport)
    }

    pub fn rpc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.rpc = Some(transport);
        self
    }

    pub fn rpc_url(self, url: impl Into<String>) -> Self {
        self.rpc(HttpTransport::shared(url))
    }

    pub fn relay(mut self, transport: Arc<dyn Transport>) -> Self {
        self.relay = Some(transport);
        self
    }

    pub fn relay_url(self, url: impl Into<String>) -> Self {
        self.relay(HttpTransport::shared(url))
    }

    pub fn fee_sponsor(mut self, transport: Arc<dyn Transport>, context: Option<Value>) -> Self {
        self.fee_sponsor = Some(FeeSponsorConfig { transport, context });
        self
    }

    pub fn fee_sponsor_url(self, url: impl Into<String>, context: Option<Value>) -> Self {
        self.fee_sponsor(HttpTransport::shared(url), context)
    }
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rpc", &self.rpc.is_some())
            .field("relay", &self.relay.is_some())
            .field("fee_sponsor", &self.fee_sponsor.is_some())
            .finish()
    }
}

/// Wallet configuration. Build it with [`Config::builder`].
#[derive(Clone)]
pub struct Config {
    pub dapp_name: Option<String>,
    pub wallet_name: String,
    chains: Vec<ChainConfig>,
    pub storage: Arc<dyn Storage>,
    pub passthrough: PassthroughPolicy,
    pub account_version: AccountVersion,
    pub timeouts: Timeouts,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Configured chains, in order.
    pub fn chains(&self) -> &[ChainConfig] {
        &self.chains
    }

    pub fn chain(&self, id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == id)
    }

    /// Chain that is active on first start.
    pub fn default_chain(&self) -> ChainId {
        // build() guarantees at least one chain
        self.chains.first().map(|c| c.id).unwrap_or_default()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("dapp_name", &self.dapp_name)
            .field("wallet_name", &self.wallet_name)
            .field("chains", &self.chains)
            .field("passthrough", &self.passthrough)
            .field("account_version", &self.account_version.name)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    dapp_name: Option<String>,
    wallet_name: Option<String>,
    chains: Vec<ChainConfig>,
    storage: Option<Arc<dyn Storage>>,
    passthrough: PassthroughPolicy,
    account_version: Option<AccountVersion>,
    timeouts: Timeouts,
}

impl ConfigBuilder {
    pub fn dapp_name(mut self, name: impl Into<String>) -> Self {
        self.dapp_name = Some(name.into());
        self
    }

    pub fn wallet_name(mut self, name: impl Into<String>) -> Self {
        self.wallet_name = Some(name.into());
        self
    }

    /// Add a chain. The first chain added is the initial active chain.
    pub fn chain(mut self, chain: ChainConfig) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn passthrough(mut self, policy: PassthroughPolicy) -> Self {
        self.passthrough = policy;
        self
    }

    pub fn account_version(mut self, version: AccountVersion) -> Self {
        self.account_version = Some(version);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<Config, ProviderError> {
        if self.chains.is_empty() {
            return Err(ProviderError::Configuration(
                "at least one chain is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                return Err(ProviderError::Configuration(format!(
                    "chain {} is configured twice",
                    chain.id
                )));
            }
        }

        Ok(Config {
            dapp_name: self.dapp_name,
            wallet_name: self.wallet_name.unwrap_or_else(|| "Batua".to_string()),
            chains: self.chains,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            passthrough: self.passthrough,
            account_version: self.account_version.unwrap_or(KERNEL_V3_1),
            timeouts: self.timeouts,
        })
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::Address;
use tracing::debug;
use uuid::Uuid;

use super::{FeeSponsorClient, PublicClient, RelayClient};
use crate::config::ChainConfig;
use crate::error::ProviderError;
use crate::store::Store;
use crate::types::ChainId;

/// Clients for one chain.
#[derive(Debug)]
pub struct ChainClients {
    pub chain_id: ChainId,
    pub rpc: PublicClient,
    relay: Option<RelayClient>,
    fee_sponsor: Option<FeeSponsorClient>,
}

impl ChainClients {
    /// Build the clients described by `chain`.
    pub fn from_config(
        chain: &ChainConfig,
        entry_point: Address,
        polling_interval: Duration,
    ) -> Result<Self, ProviderError> {
        let rpc = chain.rpc.clone().ok_or_else(|| {
            ProviderError::Configuration(format!("transport not found for chain {}", chain.id))
        })?;
        Ok(Self {
            chain_id: chain.id,
            rpc: PublicClient::new(chain.id, rpc),
            relay: chain.relay.clone().map(|transport| {
                RelayClient::new(chain.id, entry_point, transport, polling_interval)
            }),
            fee_sponsor: chain.fee_sponsor.as_ref().map(|sponsor| {
                FeeSponsorClient::new(
                    chain.id,
                    entry_point,
                    Arc::clone(&sponsor.transport),
                    sponsor.context.clone(),
                )
            }),
        })
    }

    /// The relay, which every call lifecycle needs.
    pub fn relay(&self) -> Result<&RelayClient, ProviderError> {
        self.relay.as_ref().ok_or_else(|| {
            ProviderError::Configuration(format!("relay not configured for chain {}", self.chain_id))
        })
    }

    pub fn fee_sponsor(&self) -> Option<&FeeSponsorClient> {
        self.fee_sponsor.as_ref()
    }
}

/// Lazily built, never evicted clients per `(instance, chain)`.
pub struct ClientCache {
    instance_id: Uuid,
    store: Arc<Store>,
    chains: Vec<ChainConfig>,
    entry_point: Address,
    polling_interval: Duration,
    entries: Mutex<HashMap<(Uuid, ChainId), Arc<ChainClients>>>,
}

impl ClientCache {
    pub fn new(
        instance_id: Uuid,
        store: Arc<Store>,
        chains: Vec<ChainConfig>,
        entry_point: Address,
        polling_interval: Duration,
    ) -> Self {
        Self {
            instance_id,
            store,
            chains,
            entry_point,
            polling_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Clients for `chain_id` (the active chain when `None`), building them on
    /// first use.
    pub fn get(&self, chain_id: Option<ChainId>) -> Result<Arc<ChainClients>, ProviderError> {
        let chain_id = chain_id.unwrap_or_else(|| self.store.read(|s| s.chain));
        let key = (self.instance_id, chain_id);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(clients) = entries.get(&key) {
            return Ok(Arc::clone(clients));
        }

        let chain = self
            .chains
            .iter()
            .find(|c| c.id == chain_id)
            .ok_or_else(|| ProviderError::Configuration(format!("chain {chain_id} not found")))?;
        let clients = Arc::new(ChainClients::from_config(
            chain,
            self.entry_point,
            self.polling_interval,
        )?);
        debug!(chain_id, instance = %self.instance_id, "clients created");
        entries.insert(key, Arc::clone(&clients));
        Ok(clients)
    }

    /// Number of chains with live clients.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("instance_id", &self.instance_id)
            .field("entries", &self.len())
            .finish()
    }
}

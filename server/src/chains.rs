use giftrelay_core::{
    chain::{Chain, ChainService, RelayChain, RelayChainConfig},
    error::EngineError,
};

use crate::config::{ChainConfig, SponsorConfig};

/// Builds [`RelayChain`] instances for the single chain this deployment
/// serves.
pub struct RelayChainService {
    chain: ChainConfig,
    sponsor: SponsorConfig,
}

impl RelayChainService {
    pub fn new(chain: ChainConfig, sponsor: SponsorConfig) -> Self {
        Self { chain, sponsor }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn sponsor_configured(&self) -> bool {
        self.sponsor.is_configured()
    }

    pub fn chain(&self) -> Result<RelayChain, EngineError> {
        RelayChainConfig {
            chain_id: self.chain.chain_id,
            rpc_url: &self.chain.rpc_url,
            bundler_url: self.sponsor.bundler_url.as_deref(),
            paymaster_url: self.sponsor.paymaster_url.as_deref(),
            sponsor_api_key: self.sponsor.api_key.as_deref(),
        }
        .to_chain()
    }
}

impl ChainService for RelayChainService {
    fn get_chain(&self, chain_id: u64) -> Result<impl Chain, EngineError> {
        if chain_id != self.chain.chain_id {
            return Err(EngineError::RpcConfigError {
                message: format!(
                    "chain {chain_id} is not configured; this engine serves chain {}",
                    self.chain.chain_id
                ),
            });
        }

        self.chain()
    }
}

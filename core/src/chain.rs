use crate::rpc_clients::{BundlerClient, PaymasterClient, transport::SharedClientTransportBuilder};
use alloy::{
    providers::{ProviderBuilder, RootProvider},
    transports::http::reqwest::{
        ClientBuilder as HttpClientBuilder, Url,
        header::{HeaderMap, HeaderValue},
    },
};

use crate::error::EngineError;

pub trait Chain: Send + Sync {
    fn chain_id(&self) -> u64;
    fn rpc_url(&self) -> Url;
    /// Falls back to the RPC URL when no sponsor path is configured; only
    /// used for error reporting in that case.
    fn bundler_url(&self) -> Url;
    fn paymaster_url(&self) -> Url;

    fn provider(&self) -> &RootProvider;

    /// Sponsor-path clients, present only when the sponsor integration is
    /// configured. Availability is config presence, never a network probe.
    fn sponsor(&self) -> Option<&SponsorClients>;
}

#[derive(Clone)]
pub struct SponsorClients {
    pub bundler_client: BundlerClient,
    pub paymaster_client: PaymasterClient,
}

pub struct RelayChainConfig<'a> {
    pub chain_id: u64,
    pub rpc_url: &'a str,
    pub bundler_url: Option<&'a str>,
    pub paymaster_url: Option<&'a str>,
    pub sponsor_api_key: Option<&'a str>,
}

#[derive(Clone)]
pub struct RelayChain {
    chain_id: u64,
    rpc_url: Url,
    bundler_url: Url,
    paymaster_url: Url,

    pub provider: RootProvider,
    sponsor: Option<SponsorClients>,
}

impl Chain for RelayChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn rpc_url(&self) -> Url {
        self.rpc_url.clone()
    }

    fn bundler_url(&self) -> Url {
        self.bundler_url.clone()
    }

    fn paymaster_url(&self) -> Url {
        self.paymaster_url.clone()
    }

    fn provider(&self) -> &RootProvider {
        &self.provider
    }

    fn sponsor(&self) -> Option<&SponsorClients> {
        self.sponsor.as_ref()
    }
}

impl RelayChainConfig<'_> {
    pub fn to_chain(&self) -> Result<RelayChain, EngineError> {
        let rpc_url = Url::parse(self.rpc_url).map_err(|e| EngineError::RpcConfigError {
            message: format!("Failed to parse RPC URL: {e}"),
        })?;

        let reqwest_client =
            HttpClientBuilder::new()
                .build()
                .map_err(|e| EngineError::RpcConfigError {
                    message: format!("Failed to build HTTP client: {e}"),
                })?;

        let transport_builder = SharedClientTransportBuilder::new(reqwest_client);

        let sponsor = match (self.bundler_url, self.paymaster_url) {
            (Some(bundler), Some(paymaster)) => {
                let bundler_url =
                    Url::parse(bundler).map_err(|e| EngineError::RpcConfigError {
                        message: format!("Failed to parse Bundler URL: {e}"),
                    })?;
                let paymaster_url =
                    Url::parse(paymaster).map_err(|e| EngineError::RpcConfigError {
                        message: format!("Failed to parse Paymaster URL: {e}"),
                    })?;

                let mut sponsor_headers = HeaderMap::new();
                if let Some(api_key) = self.sponsor_api_key {
                    sponsor_headers.insert(
                        "x-api-key",
                        HeaderValue::from_str(api_key).map_err(|e| {
                            EngineError::RpcConfigError {
                                message: format!("Unserialisable sponsor API key used: {e}"),
                            }
                        })?,
                    );
                }

                let bundler_transport =
                    transport_builder.with_headers(bundler_url.clone(), sponsor_headers.clone());
                let paymaster_transport =
                    transport_builder.with_headers(paymaster_url.clone(), sponsor_headers);

                Some((
                    bundler_url,
                    paymaster_url,
                    SponsorClients {
                        bundler_client: BundlerClient::new(bundler_transport),
                        paymaster_client: PaymasterClient::new(paymaster_transport),
                    },
                ))
            }
            _ => None,
        };

        let (bundler_url, paymaster_url, sponsor) = match sponsor {
            Some((bundler_url, paymaster_url, clients)) => {
                (bundler_url, paymaster_url, Some(clients))
            }
            None => (rpc_url.clone(), rpc_url.clone(), None),
        };

        Ok(RelayChain {
            chain_id: self.chain_id,

            provider: ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_http(rpc_url.clone()),

            rpc_url,
            bundler_url,
            paymaster_url,
            sponsor,
        })
    }
}

pub trait ChainService {
    fn get_chain(&self, chain_id: u64) -> Result<impl Chain, EngineError>;
}

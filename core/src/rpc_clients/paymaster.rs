use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::client::RpcClient;
use alloy::transports::{IntoBoxTransport, TransportResult};
use serde::{Deserialize, Serialize};

use crate::userop::SponsoredUserOp;

/// A JSON-RPC client for the fee-sponsoring paymaster
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    inner: RpcClient,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterSponsorship {
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub pre_verification_gas: Option<U256>,
    #[serde(default)]
    pub verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub call_gas_limit: Option<U256>,
}

impl PaymasterClient {
    /// Create a new paymaster client with the given transport
    pub fn new(transport: impl IntoBoxTransport) -> Self {
        let client = RpcClient::builder().transport(transport, false);

        Self { inner: client }
    }

    /// Ask the paymaster to sponsor the given user operation
    pub async fn sponsor_user_op(
        &self,
        user_op: &SponsoredUserOp,
        entrypoint: Address,
    ) -> TransportResult<PaymasterSponsorship> {
        self.inner
            .request("pm_sponsorUserOperation", (user_op, entrypoint))
            .await
    }
}

use alloy::primitives::{Address, Bytes};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::UserOperationReceipt;
use alloy::transports::{IntoBoxTransport, TransportResult};

use crate::userop::SponsoredUserOp;

/// A JSON-RPC client for the sponsored-execution bundler
#[derive(Debug, Clone)]
pub struct BundlerClient {
    inner: RpcClient,
}

impl BundlerClient {
    /// Create a new bundler client with the given transport
    pub fn new(transport: impl IntoBoxTransport) -> Self {
        let client = RpcClient::builder().transport(transport, false);

        Self { inner: client }
    }

    /// Submit a sponsored user operation. Returns the user operation hash,
    /// which is NOT the transaction hash; the inclusion receipt carries that.
    pub async fn send_user_op(
        &self,
        user_op: &SponsoredUserOp,
        entrypoint: Address,
    ) -> TransportResult<Bytes> {
        let result: Bytes = self
            .inner
            .request("eth_sendUserOperation", (user_op, entrypoint))
            .await?;

        Ok(result)
    }

    /// Get a user operation receipt by hash
    pub async fn get_user_op_receipt(
        &self,
        user_op_hash: Bytes,
    ) -> TransportResult<Option<UserOperationReceipt>> {
        self.inner
            .request("eth_getUserOperationReceipt", [user_op_hash])
            .await
    }
}

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// ERC-4337 v0.6 user operation as the sponsor path submits it. The engine
/// only ever populates the fields below; gas fields may be overwritten by the
/// paymaster's sponsorship response before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredUserOp {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub signature: Bytes,
}

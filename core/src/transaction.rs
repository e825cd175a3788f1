use crate::defs::{AddressDef, BytesDef, U256Def};
use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// ### InnerTransaction
/// The encoded call this engine submits to the blockchain, independent of
/// which execution path carries it.
#[derive(Deserialize, Serialize, Debug, Clone, utoipa::ToSchema)]
pub struct InnerTransaction {
    #[schema(value_type = Option<AddressDef>)]
    pub to: Option<Address>,

    #[schema(value_type = BytesDef)]
    #[serde(default)]
    pub data: Bytes,

    #[schema(value_type = U256Def)]
    #[serde(default)]
    pub value: U256,

    /// Gas limit for the transaction.
    /// If not provided, engine will estimate the gas limit.
    #[schema(value_type = Option<u64>)]
    #[serde(default, rename = "gasLimit")]
    pub gas_limit: Option<u64>,
}

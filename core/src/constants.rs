use alloy::primitives::{Address, address};

/// Canonical ERC-4337 v0.6 entrypoint, used when the sponsor config does not
/// override it.
pub const DEFAULT_ENTRYPOINT_ADDRESS_V0_6: Address =
    address!("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

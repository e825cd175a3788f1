use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The logical operations this engine submits on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Mint an NFT to an explicit recipient.
    MintTo,
    /// Claim an escrowed gift; the asset goes to `msg.sender`.
    ClaimGift,
    /// Administrative return of an unclaimed gift to its creator.
    ReturnGift,
    /// Transfer a token out of the engine-held escrow account.
    TransferToken,
}

impl OperationType {
    /// True when the operation's asset lands on `msg.sender`. Such
    /// operations must never be submitted from a server-held account: the
    /// asset would land in the wrong wallet.
    pub fn is_recipient_sensitive(&self) -> bool {
        matches!(self, OperationType::ClaimGift)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::MintTo => "mint_to",
            OperationType::ClaimGift => "claim_gift",
            OperationType::ReturnGift => "return_gift",
            OperationType::TransferToken => "transfer_token",
        }
    }
}

/// Which account submits and pays for a prepared call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPath {
    /// Sponsored execution via the bundler/paymaster integration.
    Gasless,
    /// The engine's funded local signer pays fees directly.
    GasPaid,
    /// The caller supplied a fully signed transaction; the engine only
    /// broadcasts it.
    ClientSigned,
}

/// Whether a failed on-chain effect check fails the operation or only logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    Mandatory,
    Advisory,
}

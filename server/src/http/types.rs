use alloy::primitives::B256;
use giftrelay_core::defs::B256Def;
use giftrelay_executors::rate_limiter::RateLimitDecision;
use serde::Serialize;

use crate::execution_router::OperationOutcome;

#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Attempts left in the current window.
    pub remaining: u32,
    /// Epoch milliseconds at which the window resets.
    pub reset_time: u64,
}

impl From<RateLimitDecision> for RateLimitInfo {
    fn from(decision: RateLimitDecision) -> Self {
        Self {
            remaining: decision.remaining,
            reset_time: decision.reset_at_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub success: bool,

    #[schema(value_type = Option<B256Def>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,

    /// Engine correlation nonce for later `/status/{nonce}` lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,

    /// Outcome of the on-chain effect check; absent when it could not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

impl From<OperationOutcome> for TransactionResponse {
    fn from(outcome: OperationOutcome) -> Self {
        Self {
            success: true,
            transaction_hash: Some(outcome.transaction_hash),
            nonce: Some(outcome.nonce),
            rate_limit: Some(outcome.rate_limit.into()),
            verified: outcome.verified,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub nonce: String,
    /// `completed`, `failed`, or `unknown` when no record exists (expired
    /// or never issued).
    pub status: String,

    #[schema(value_type = Option<B256Def>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-operation result inside a batch response. Failures are reported in
/// place; a batch never aborts halfway.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntryResponse {
    pub success: bool,

    #[schema(value_type = Option<B256Def>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub results: Vec<BatchEntryResponse>,
}

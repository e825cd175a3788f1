use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Chain;

#[derive(Debug, Error, Clone, Serialize, Deserialize, JsonSchema, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {0}")]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails. This allows custom
    /// errors from local signers or request pre-processors.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError { message: String },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError { message: String, text: String },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, utoipa::ToSchema)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The error data (if any).
    pub data: Option<String>,
}

impl std::fmt::Display for RpcErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, ", data: {data}")?;
        }
        Ok(())
    }
}

/// Closed classification of execution failures, produced at the RPC boundary
/// by the error classifier. Retry policy dispatches on the variant, never on
/// message text.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize, JsonSchema, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorKind {
    /// The call reverted, either during simulation or on-chain.
    #[error("execution reverted: {message}")]
    Reverted { message: String },

    /// The submitting account cannot cover gas * price + value.
    #[error("insufficient funds: {message}")]
    InsufficientFunds { message: String },

    /// Account nonce already consumed; the transaction may already be mined.
    #[error("nonce too low: {message}")]
    NonceTooLow { message: String },

    /// Malformed call: bad arguments, bad encoding, rejected parameters.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The node already has an identical transaction in its pool.
    #[error("transaction already known: {message}")]
    AlreadyKnown { message: String },

    /// Receipt did not arrive within the confirmation timeout. The
    /// transaction may still confirm later; reconciliation owns recovery.
    #[error("timed out awaiting receipt for {transaction_hash}")]
    ReceiptTimeout { transaction_hash: String },

    /// Transient transport/node failure, safe to retry with backoff.
    #[error("transient execution error: {message}")]
    Transient { message: String },
}

impl ExecutionErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionErrorKind::Transient { .. })
    }
}

/// How a duplicate operation key was occupied when a new attempt arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateState {
    /// The original operation already completed; its hash is returned.
    Completed,
    /// An attempt is still inside the in-flight grace period.
    InFlight,
    /// The original attempt timed out awaiting its receipt and has not
    /// been reconciled against chain state yet.
    AwaitingReceipt,
}

#[derive(Error, Debug, Serialize, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum EngineError {
    #[schema(title = "EVM RPC Error")]
    #[error("RPC error on chain {chain_id} at {rpc_url}: {message}")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[schema(title = "Paymaster Error")]
    #[error("Paymaster error on chain {chain_id} at {rpc_url}: {message}")]
    PaymasterError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[schema(title = "Bundler Error")]
    #[error("Bundler error on chain {chain_id} at {rpc_url}: {message}")]
    BundlerError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[schema(title = "RPC Configuration Error")]
    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[schema(title = "Rate Limit Exceeded")]
    #[error("Rate limit exceeded, retry after {reset_at_ms}")]
    #[serde(rename_all = "camelCase")]
    RateLimitExceeded {
        /// Attempts left in the current window (zero when rejected).
        remaining: u32,
        /// Epoch milliseconds at which the window resets.
        reset_at_ms: u64,
    },

    #[schema(title = "Duplicate Operation")]
    #[error("Duplicate operation {operation_key}")]
    #[serde(rename_all = "camelCase")]
    DuplicateOperation {
        operation_key: String,
        state: DuplicateState,
        #[serde(skip_serializing_if = "Option::is_none")]
        transaction_hash: Option<String>,
    },

    /// The dedup/rate-limit store is unreachable. Execution is never
    /// attempted without it: an unguarded submission could double-mint.
    #[schema(title = "Store Unavailable")]
    #[error("Durable store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[schema(title = "Execution Error")]
    #[error("Execution failed: {kind}")]
    ExecutionError { kind: ExecutionErrorKind },

    #[schema(title = "Verification Mismatch")]
    #[error("On-chain effect mismatch: expected {expected}, got {actual}")]
    VerificationMismatch { expected: String, actual: String },

    #[schema(title = "Validation Error")]
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[schema(title = "Authentication Error")]
    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[schema(title = "Engine Internal Error")]
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl From<redis::RedisError> for EngineError {
    fn from(error: redis::RedisError) -> Self {
        EngineError::StoreUnavailable {
            message: error.to_string(),
        }
    }
}

fn to_engine_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            TransportErrorKind::Custom(err) => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

pub trait AlloyRpcErrorToEngineError {
    fn to_engine_error(&self, chain: &impl Chain) -> EngineError;
    fn to_engine_bundler_error(&self, chain: &impl Chain) -> EngineError;
    fn to_engine_paymaster_error(&self, chain: &impl Chain) -> EngineError;
}

impl AlloyRpcErrorToEngineError for AlloyRpcError<TransportErrorKind> {
    fn to_engine_error(&self, chain: &impl Chain) -> EngineError {
        EngineError::RpcError {
            chain_id: chain.chain_id(),
            rpc_url: chain.rpc_url().to_string(),
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }

    fn to_engine_bundler_error(&self, chain: &impl Chain) -> EngineError {
        EngineError::BundlerError {
            chain_id: chain.chain_id(),
            rpc_url: chain.bundler_url().to_string(),
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }

    fn to_engine_paymaster_error(&self, chain: &impl Chain) -> EngineError {
        EngineError::PaymasterError {
            chain_id: chain.chain_id(),
            rpc_url: chain.paymaster_url().to_string(),
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }
}

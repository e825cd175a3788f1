use axum::{Json, http::StatusCode, response::IntoResponse};
use giftrelay_core::error::{EngineError, ExecutionErrorKind};
use serde_json::json;

/// Extension trait for EngineError to add HTTP response conversion
#[derive(Debug)]
pub struct ApiEngineError(pub EngineError);

impl From<EngineError> for ApiEngineError {
    fn from(error: EngineError) -> Self {
        ApiEngineError(error)
    }
}

impl IntoResponse for ApiEngineError {
    fn into_response(self) -> axum::response::Response {
        let code = self.status_code();

        (
            code,
            Json(json!({
                "success": false,
                "error": {
                    "reason": self.reason(),
                    "message": self.0.to_string(),
                    "details": self.0
                }
            })),
        )
            .into_response()
    }
}

impl ApiEngineError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            EngineError::RpcError { .. } => StatusCode::BAD_GATEWAY,
            EngineError::PaymasterError { .. } => StatusCode::BAD_GATEWAY,
            EngineError::BundlerError { .. } => StatusCode::BAD_GATEWAY,
            EngineError::RpcConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::DuplicateOperation { .. } => StatusCode::CONFLICT,
            EngineError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::ExecutionError { kind } => match kind {
                ExecutionErrorKind::Transient { .. } => StatusCode::BAD_GATEWAY,
                ExecutionErrorKind::ReceiptTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_REQUEST,
            },
            EngineError::VerificationMismatch { .. } => StatusCode::BAD_GATEWAY,
            EngineError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            EngineError::AuthError { .. } => StatusCode::UNAUTHORIZED,
            EngineError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason so clients can tell "try again later"
    /// from "do not retry" without parsing messages.
    fn reason(&self) -> &'static str {
        match &self.0 {
            EngineError::RpcError { .. } => "UPSTREAM_RPC_ERROR",
            EngineError::PaymasterError { .. } => "PAYMASTER_ERROR",
            EngineError::BundlerError { .. } => "BUNDLER_ERROR",
            EngineError::RpcConfigError { .. } => "RPC_CONFIG_ERROR",
            EngineError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            EngineError::DuplicateOperation { .. } => "DUPLICATE_OPERATION",
            EngineError::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            EngineError::ExecutionError { kind } => match kind {
                ExecutionErrorKind::Reverted { .. } => "EXECUTION_REVERTED",
                ExecutionErrorKind::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
                ExecutionErrorKind::NonceTooLow { .. } => "NONCE_TOO_LOW",
                ExecutionErrorKind::InvalidInput { .. } => "INVALID_INPUT",
                ExecutionErrorKind::AlreadyKnown { .. } => "ALREADY_KNOWN",
                ExecutionErrorKind::ReceiptTimeout { .. } => "EXECUTION_TIMEOUT",
                ExecutionErrorKind::Transient { .. } => "RETRYABLE_EXECUTION_ERROR",
            },
            EngineError::VerificationMismatch { .. } => "VERIFICATION_MISMATCH",
            EngineError::ValidationError { .. } => "VALIDATION_ERROR",
            EngineError::AuthError { .. } => "UNAUTHORIZED",
            EngineError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }
}

/// Result extension trait for more ergonomic usage
pub trait EngineResult<T, E> {
    fn api_error(self) -> Result<T, ApiEngineError>;
}

impl<T, E: Into<EngineError>> EngineResult<T, E> for Result<T, E> {
    fn api_error(self) -> Result<T, ApiEngineError> {
        self.map_err(|e| ApiEngineError(e.into()))
    }
}

use alloy::transports::{RpcError, TransportErrorKind};
use giftrelay_core::error::ExecutionErrorKind;

/// Maps RPC failures into the closed [`ExecutionErrorKind`] enum at the
/// boundary where they originate. This is the only place error message text
/// is ever inspected; everything downstream dispatches on the variant.
pub struct ExecutionErrorMapper;

impl ExecutionErrorMapper {
    pub fn map_rpc_error(error: &RpcError<TransportErrorKind>) -> ExecutionErrorKind {
        match error {
            RpcError::ErrorResp(payload) => {
                Self::map_error_response(payload.code, &payload.message)
            }
            RpcError::SerError(err) => ExecutionErrorKind::InvalidInput {
                message: err.to_string(),
            },
            RpcError::UnsupportedFeature(feature) => ExecutionErrorKind::InvalidInput {
                message: format!("unsupported feature: {feature}"),
            },
            // Null/deser responses and transport failures are node trouble,
            // not call trouble.
            _ => ExecutionErrorKind::Transient {
                message: error.to_string(),
            },
        }
    }

    fn map_error_response(code: i64, message: &str) -> ExecutionErrorKind {
        let msg_lower = message.to_lowercase();

        if msg_lower.contains("revert") {
            return ExecutionErrorKind::Reverted {
                message: message.to_string(),
            };
        }

        match code {
            -32000 => {
                if msg_lower.contains("nonce too low") {
                    ExecutionErrorKind::NonceTooLow {
                        message: message.to_string(),
                    }
                } else if msg_lower.contains("insufficient funds") {
                    ExecutionErrorKind::InsufficientFunds {
                        message: message.to_string(),
                    }
                } else if msg_lower.contains("already known") || msg_lower.contains("duplicate") {
                    ExecutionErrorKind::AlreadyKnown {
                        message: message.to_string(),
                    }
                } else if msg_lower.contains("intrinsic gas")
                    || msg_lower.contains("exceeds block gas limit")
                    || msg_lower.contains("invalid")
                {
                    ExecutionErrorKind::InvalidInput {
                        message: message.to_string(),
                    }
                } else {
                    ExecutionErrorKind::Transient {
                        message: message.to_string(),
                    }
                }
            }
            // JSON-RPC invalid request/params/method: the call itself is
            // malformed, retrying cannot help.
            -32600 | -32601 | -32602 => ExecutionErrorKind::InvalidInput {
                message: message.to_string(),
            },
            _ => ExecutionErrorKind::Transient {
                message: format!("RPC error code {code}: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_too_low_mapping() {
        let kind = ExecutionErrorMapper::map_error_response(-32000, "nonce too low");

        match kind {
            ExecutionErrorKind::NonceTooLow { .. } => {}
            other => panic!("Expected NonceTooLow, got {other:?}"),
        }
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_insufficient_funds_mapping() {
        let kind = ExecutionErrorMapper::map_error_response(
            -32000,
            "insufficient funds for gas * price + value",
        );

        match kind {
            ExecutionErrorKind::InsufficientFunds { .. } => {}
            other => panic!("Expected InsufficientFunds, got {other:?}"),
        }
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_revert_mapping_wins_over_code_triage() {
        let kind = ExecutionErrorMapper::map_error_response(-32603, "execution reverted: ERC721: token already minted");

        match kind {
            ExecutionErrorKind::Reverted { .. } => {}
            other => panic!("Expected Reverted, got {other:?}"),
        }
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_already_known_mapping() {
        let kind = ExecutionErrorMapper::map_error_response(-32000, "already known");

        match kind {
            ExecutionErrorKind::AlreadyKnown { .. } => {}
            other => panic!("Expected AlreadyKnown, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_params_mapping() {
        let kind = ExecutionErrorMapper::map_error_response(-32602, "invalid params");

        match kind {
            ExecutionErrorKind::InvalidInput { .. } => {}
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_unrecognised_server_error_is_transient() {
        let kind = ExecutionErrorMapper::map_error_response(-32000, "mempool is congested");

        assert!(kind.is_retryable());
    }

    #[test]
    fn test_unknown_code_is_transient() {
        let kind = ExecutionErrorMapper::map_error_response(-32099, "node restarting");

        assert!(kind.is_retryable());
    }
}

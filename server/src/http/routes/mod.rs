use alloy::primitives::{B256, U256, keccak256};
use giftrelay_core::error::EngineError;

use crate::http::error::ApiEngineError;

pub mod claim;
pub mod gift_return;
pub mod mint;
pub mod status;
pub mod transfer;

/// Token ids arrive as decimal or 0x-hex strings.
pub(crate) fn parse_token_id(s: &str) -> Result<U256, ApiEngineError> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    };

    parsed.map_err(|_| {
        ApiEngineError(EngineError::ValidationError {
            message: format!("invalid token id: {s}"),
        })
    })
}

/// Gift ids are either the escrow's 32-byte identifier in 0x-hex, or an
/// opaque string the contract side hashed the same way.
pub(crate) fn parse_gift_id(s: &str) -> Result<B256, ApiEngineError> {
    if let Some(hex) = s.strip_prefix("0x") {
        if hex.len() == 64 {
            return s.parse::<B256>().map_err(|_| {
                ApiEngineError(EngineError::ValidationError {
                    message: format!("invalid gift id: {s}"),
                })
            });
        }
    }

    Ok(keccak256(s.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_id_decimal_and_hex() {
        assert_eq!(parse_token_id("42").unwrap(), U256::from(42u64));
        assert_eq!(parse_token_id("0x2a").unwrap(), U256::from(42u64));
        assert!(parse_token_id("not-a-number").is_err());
    }

    #[test]
    fn test_parse_gift_id_accepts_hex_and_hashes_strings() {
        let hex_id = format!("0x{}", "ab".repeat(32));
        assert_eq!(
            parse_gift_id(&hex_id).unwrap(),
            hex_id.parse::<B256>().unwrap()
        );

        let hashed = parse_gift_id("gift-7").unwrap();
        assert_eq!(hashed, keccak256(b"gift-7"));
    }
}

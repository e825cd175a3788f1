use alloy::primitives::Address;
use axum::{
    Json,
    extract::{FromRequestParts, rejection::JsonRejection},
    http::{header::AUTHORIZATION, request::Parts},
};
use giftrelay_core::error::EngineError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::http::{error::ApiEngineError, server::EngineServerState};

type HmacSha256 = Hmac<Sha256>;

/// The wallet identity a bearer token authenticates. Routes compare this
/// against the addresses in the request body; a mismatch is an auth error,
/// not a validation error.
pub struct AuthenticatedUser(pub Address);

impl FromRequestParts<EngineServerState> for AuthenticatedUser {
    type Rejection = ApiEngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &EngineServerState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiEngineError(EngineError::AuthError {
                    message: "Missing Authorization header".to_string(),
                })
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiEngineError(EngineError::AuthError {
                message: "Authorization header must be a bearer token".to_string(),
            })
        })?;

        let user = verify_bearer_token(token, state.auth_secret.as_bytes())
            .map_err(ApiEngineError)?;

        Ok(AuthenticatedUser(user))
    }
}

/// Bearer tokens are `<address>.<hex hmac-sha256(secret, lowercase address)>`.
pub fn verify_bearer_token(token: &str, secret: &[u8]) -> Result<Address, EngineError> {
    let (address_part, mac_part) = token.split_once('.').ok_or_else(|| EngineError::AuthError {
        message: "Malformed bearer token".to_string(),
    })?;

    let address: Address = address_part.parse().map_err(|_| EngineError::AuthError {
        message: "Bearer token does not encode a valid address".to_string(),
    })?;

    let mac_bytes = hex::decode(mac_part).map_err(|_| EngineError::AuthError {
        message: "Malformed bearer token signature".to_string(),
    })?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| EngineError::InternalError {
            message: format!("Bad auth secret: {e}"),
        })?;
    mac.update(format!("{address:#x}").as_bytes());
    mac.verify_slice(&mac_bytes)
        .map_err(|_| EngineError::AuthError {
            message: "Invalid bearer token signature".to_string(),
        })?;

    Ok(address)
}

/// Mint a token for `address`; the ops tooling and tests use this.
pub fn issue_bearer_token(address: &Address, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(format!("{address:#x}").as_bytes());
    format!(
        "{address:#x}.{}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Custom JSON extractor that converts serde errors to ApiEngineError
pub struct EngineJson<T>(pub T);

impl<T, S> axum::extract::FromRequest<S> for EngineJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiEngineError;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(data)) => Ok(EngineJson(data)),
            Err(rejection) => {
                let message = match rejection {
                    JsonRejection::JsonDataError(err) => format!("Invalid JSON data: {}", err),
                    JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
                    JsonRejection::MissingJsonContentType(_) => {
                        "Missing or invalid Content-Type header. Expected application/json"
                            .to_string()
                    }
                    JsonRejection::BytesRejection(err) => {
                        format!("Failed to read request body: {}", err)
                    }
                    _ => "Invalid JSON request".to_string(),
                };

                Err(ApiEngineError(EngineError::ValidationError { message }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const USER: Address = address!("0x00000000000000000000000000000000000000aa");
    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_issued_token_round_trips() {
        let token = issue_bearer_token(&USER, SECRET);
        let verified = verify_bearer_token(&token, SECRET).unwrap();

        assert_eq!(verified, USER);
    }

    #[test]
    fn test_token_for_other_address_is_rejected() {
        let token = issue_bearer_token(&USER, SECRET);
        let other = address!("0x00000000000000000000000000000000000000bb");

        // Splice another address onto a valid signature.
        let mac_part = token.split_once('.').unwrap().1.to_string();
        let forged = format!("{other:#x}.{mac_part}");

        assert!(verify_bearer_token(&forged, SECRET).is_err());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = issue_bearer_token(&USER, SECRET);

        assert!(verify_bearer_token(&token, b"other-secret").is_err());
    }

    #[test]
    fn test_malformed_token_is_rejected() {
        assert!(verify_bearer_token("not-a-token", SECRET).is_err());
        assert!(verify_bearer_token("0x1234.zzzz", SECRET).is_err());
    }
}

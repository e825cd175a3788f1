use axum::{
    Json,
    extract::{Path, State},
};

use crate::http::{
    error::{ApiEngineError, EngineResult},
    extractors::AuthenticatedUser,
    server::EngineServerState,
    types::StatusResponse,
};

/// Idempotent status lookup against the long-lived completion/failure
/// records. An expired or never-issued nonce reads as `unknown`.
pub async fn operation_status(
    State(state): State<EngineServerState>,
    _auth: AuthenticatedUser,
    Path(nonce): Path<String>,
) -> Result<Json<StatusResponse>, ApiEngineError> {
    if let Some(completion) = state.router.registry.completion(&nonce).await.api_error()? {
        return Ok(Json(StatusResponse {
            nonce,
            status: "completed".to_string(),
            transaction_hash: Some(completion.transaction_hash),
            reason: None,
        }));
    }

    if let Some(failure) = state.router.registry.failure(&nonce).await.api_error()? {
        return Ok(Json(StatusResponse {
            nonce,
            status: "failed".to_string(),
            transaction_hash: None,
            reason: Some(failure.reason),
        }));
    }

    Ok(Json(StatusResponse {
        nonce,
        status: "unknown".to_string(),
        transaction_hash: None,
        reason: None,
    }))
}

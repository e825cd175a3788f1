use alloy::{
    primitives::{Address, Bytes, U256, keccak256},
    sol,
    sol_types::SolCall,
};
use axum::{Json, extract::State};
use giftrelay_core::{
    defs::{AddressDef, BytesDef},
    error::EngineError,
    operation::{OperationType, VerificationPolicy},
    transaction::InnerTransaction,
};
use serde::Deserialize;

use crate::{
    execution_router::OperationRequest,
    http::{
        error::{ApiEngineError, EngineResult},
        extractors::{AuthenticatedUser, EngineJson},
        routes::{parse_gift_id, parse_token_id},
        server::EngineServerState,
        types::TransactionResponse,
    },
};

sol! {
    function claimGift(bytes32 giftId, bytes32 passwordHash, address recipient);
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub token_id: String,
    pub gift_id: String,
    pub password: String,
    pub salt: String,

    #[schema(value_type = AddressDef)]
    pub claimer_address: Address,

    #[serde(default)]
    pub gasless: Option<bool>,

    /// Claims are recipient-sensitive: the engine refuses to sign them with
    /// any server-held key, so the claimer's wallet signs and the engine
    /// only broadcasts.
    #[schema(value_type = Option<BytesDef>)]
    #[serde(default)]
    pub signed_transaction: Option<Bytes>,
}

pub async fn claim_gift(
    State(state): State<EngineServerState>,
    auth: AuthenticatedUser,
    EngineJson(request): EngineJson<ClaimRequest>,
) -> Result<Json<TransactionResponse>, ApiEngineError> {
    if auth.0 != request.claimer_address {
        return Err(ApiEngineError(EngineError::AuthError {
            message: "authenticated identity does not match claimerAddress".to_string(),
        }));
    }

    let gift_id = parse_gift_id(&request.gift_id)?;
    let token_id = parse_token_id(&request.token_id)?;
    let password_hash = keccak256(format!("{}{}", request.password, request.salt).as_bytes());

    let data = claimGiftCall {
        giftId: gift_id,
        passwordHash: password_hash,
        recipient: request.claimer_address,
    }
    .abi_encode();

    let outcome = state
        .router
        .execute_operation(OperationRequest {
            user: request.claimer_address,
            operation: OperationType::ClaimGift,
            target: format!("{gift_id:#x}"),
            transaction: InnerTransaction {
                to: Some(state.router.escrow_address),
                data: data.into(),
                value: U256::ZERO,
                gas_limit: None,
            },
            signed_transaction: request.signed_transaction,
            gasless: request.gasless,
            expected_recipient: request.claimer_address,
            expected_token_id: Some(token_id),
            // A claim that did not move the expected token to the claimer
            // is a failure, not a warning.
            verification: VerificationPolicy::Mandatory,
        })
        .await
        .api_error()?;

    Ok(Json(outcome.into()))
}

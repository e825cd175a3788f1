use alloy::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};
use axum::{Json, extract::State};
use giftrelay_core::{
    defs::AddressDef,
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
        routes::parse_token_id,
        server::EngineServerState,
        types::TransactionResponse,
    },
};

sol! {
    function safeTransferFrom(address from, address to, uint256 tokenId);
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub token_id: String,

    #[schema(value_type = AddressDef)]
    pub to_address: Address,
}

/// Transfers a token out of the engine-held escrow account, so the funded
/// signer is both `msg.sender` and the `from` of the transfer.
pub async fn transfer_token(
    State(state): State<EngineServerState>,
    auth: AuthenticatedUser,
    EngineJson(request): EngineJson<TransferRequest>,
) -> Result<Json<TransactionResponse>, ApiEngineError> {
    let Some(signer) = state.router.signer.as_ref() else {
        return Err(ApiEngineError(EngineError::ValidationError {
            message: "token transfers require the engine's funded signer".to_string(),
        }));
    };

    let token_id = parse_token_id(&request.token_id)?;

    let data = safeTransferFromCall {
        from: signer.address(),
        to: request.to_address,
        tokenId: token_id,
    }
    .abi_encode();

    let outcome = state
        .router
        .execute_operation(OperationRequest {
            user: auth.0,
            operation: OperationType::TransferToken,
            target: request.token_id.clone(),
            transaction: InnerTransaction {
                to: Some(state.router.nft_address),
                data: data.into(),
                value: U256::ZERO,
                gas_limit: None,
            },
            signed_transaction: None,
            // The engine account owns the token; the sponsor account does
            // not, so this operation never rides the gasless path.
            gasless: Some(false),
            expected_recipient: request.to_address,
            expected_token_id: Some(token_id),
            verification: VerificationPolicy::Advisory,
        })
        .await
        .api_error()?;

    Ok(Json(outcome.into()))
}

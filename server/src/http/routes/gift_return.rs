use alloy::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};
use axum::{Json, extract::State};
use giftrelay_core::{
    defs::AddressDef,
    operation::{OperationType, VerificationPolicy},
    transaction::InnerTransaction,
};
use serde::Deserialize;

use crate::{
    execution_router::OperationRequest,
    http::{
        error::{ApiEngineError, EngineResult},
        extractors::{AuthenticatedUser, EngineJson},
        routes::parse_gift_id,
        server::EngineServerState,
        types::TransactionResponse,
    },
};

sol! {
    function returnGift(bytes32 giftId, address to);
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnGiftRequest {
    pub gift_id: String,

    /// The gift creator getting the unclaimed asset back.
    #[schema(value_type = AddressDef)]
    pub to_address: Address,

    #[serde(default)]
    pub gasless: Option<bool>,
}

/// Administrative return of an unclaimed gift. Not recipient-sensitive:
/// the escrow contract sends to `to`, whoever submits.
pub async fn return_gift(
    State(state): State<EngineServerState>,
    auth: AuthenticatedUser,
    EngineJson(request): EngineJson<ReturnGiftRequest>,
) -> Result<Json<TransactionResponse>, ApiEngineError> {
    let gift_id = parse_gift_id(&request.gift_id)?;

    let data = returnGiftCall {
        giftId: gift_id,
        to: request.to_address,
    }
    .abi_encode();

    let outcome = state
        .router
        .execute_operation(OperationRequest {
            user: auth.0,
            operation: OperationType::ReturnGift,
            target: format!("{gift_id:#x}"),
            transaction: InnerTransaction {
                to: Some(state.router.escrow_address),
                data: data.into(),
                value: U256::ZERO,
                gas_limit: None,
            },
            signed_transaction: None,
            gasless: request.gasless,
            expected_recipient: request.to_address,
            expected_token_id: None,
            verification: VerificationPolicy::Advisory,
        })
        .await
        .api_error()?;

    Ok(Json(outcome.into()))
}

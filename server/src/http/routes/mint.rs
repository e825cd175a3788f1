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
        server::EngineServerState,
        types::{BatchEntryResponse, BatchResponse, TransactionResponse},
    },
};

sol! {
    function mintTo(address to, string uri);
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    #[schema(value_type = AddressDef)]
    pub recipient_address: Address,
    pub token_uri: String,

    #[serde(default)]
    pub gasless: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchMintRequest {
    pub operations: Vec<MintRequest>,
}

fn to_operation_request(
    state: &EngineServerState,
    caller: Address,
    request: MintRequest,
) -> OperationRequest {
    let data = mintToCall {
        to: request.recipient_address,
        uri: request.token_uri.clone(),
    }
    .abi_encode();

    OperationRequest {
        user: caller,
        operation: OperationType::MintTo,
        target: format!("{:#x}:{}", request.recipient_address, request.token_uri),
        transaction: InnerTransaction {
            to: Some(state.router.nft_address),
            data: data.into(),
            value: U256::ZERO,
            gas_limit: None,
        },
        signed_transaction: None,
        gasless: request.gasless,
        expected_recipient: request.recipient_address,
        // The minted id is assigned by the contract, unknown up front.
        expected_token_id: None,
        verification: VerificationPolicy::Advisory,
    }
}

pub async fn mint_nft(
    State(state): State<EngineServerState>,
    auth: AuthenticatedUser,
    EngineJson(request): EngineJson<MintRequest>,
) -> Result<Json<TransactionResponse>, ApiEngineError> {
    let operation = to_operation_request(&state, auth.0, request);
    let outcome = state.router.execute_operation(operation).await.api_error()?;

    Ok(Json(outcome.into()))
}

pub async fn mint_nft_batch(
    State(state): State<EngineServerState>,
    auth: AuthenticatedUser,
    EngineJson(request): EngineJson<BatchMintRequest>,
) -> Result<Json<BatchResponse>, ApiEngineError> {
    let operations = request
        .operations
        .into_iter()
        .map(|op| to_operation_request(&state, auth.0, op))
        .collect();

    let results = state
        .router
        .execute_batch(operations)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(outcome) => BatchEntryResponse {
                success: true,
                transaction_hash: Some(outcome.transaction_hash),
                nonce: Some(outcome.nonce),
                error: None,
            },
            Err(e) => BatchEntryResponse {
                success: false,
                transaction_hash: None,
                nonce: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(BatchResponse { results }))
}

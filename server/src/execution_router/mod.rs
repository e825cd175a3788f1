use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::{
    primitives::{Address, B256, Bytes, U256},
    providers::Provider,
    signers::local::PrivateKeySigner,
};
use giftrelay_core::{
    chain::Chain,
    error::{AlloyRpcErrorToEngineError, DuplicateState, EngineError, ExecutionErrorKind},
    operation::{ExecutionPath, OperationType, VerificationPolicy},
    transaction::InnerTransaction,
};
use giftrelay_executors::{
    executor::{
        ClientSignedSubmitter, ExecutionOutcome, GasPaidSubmitter, GaslessSubmitter, PreparedCall,
        TransactionExecutor,
    },
    rate_limiter::{RateLimitDecision, RedisRateLimiter},
    registry::{AttemptRegistry, AttemptStatus, OperationKey, ReservationOutcome, TransactionAttempt},
    verifier::{ChainEventVerifier, ChainReceiptSource},
};

use crate::chains::RelayChainService;

/// One logical intent, as the HTTP routes hand it to the engine.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub user: Address,
    pub operation: OperationType,
    /// Stable identifier of the operation's target (gift id, token id,
    /// mint destination), folded into the dedup key.
    pub target: String,
    pub transaction: InnerTransaction,
    /// Raw signed transaction supplied by the client; required for
    /// recipient-sensitive operations.
    pub signed_transaction: Option<Bytes>,
    /// Explicit path preference from the request, if any.
    pub gasless: Option<bool>,
    pub expected_recipient: Address,
    pub expected_token_id: Option<U256>,
    pub verification: VerificationPolicy,
}

#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub transaction_hash: B256,
    pub nonce: String,
    pub rate_limit: RateLimitDecision,
    /// None when verification could not run; policy decides what that means.
    pub verified: Option<bool>,
}

/// Orchestrates the engine's data flow: rate limit -> dedup reservation ->
/// path selection -> execution -> on-chain verification -> terminal
/// marking. The durable store is the only shared state; this struct holds
/// no locks of its own.
pub struct ExecutionRouter {
    pub chains: Arc<RelayChainService>,
    pub rate_limiter: RedisRateLimiter,
    pub registry: AttemptRegistry,
    pub executor: TransactionExecutor,
    pub verifier: ChainEventVerifier,
    pub signer: Option<PrivateKeySigner>,
    pub sponsor_account: Option<Address>,
    pub entrypoint: Address,
    pub escrow_address: Address,
    pub nft_address: Address,
    pub dedup_bucket: Duration,
}

impl ExecutionRouter {
    /// Pick the execution path for an operation, enforcing the hard rule
    /// that recipient-sensitive operations never ride a server-held key.
    pub fn select_path(
        &self,
        operation: OperationType,
        has_client_signature: bool,
        gasless: Option<bool>,
    ) -> Result<ExecutionPath, EngineError> {
        choose_path(
            operation,
            has_client_signature,
            gasless,
            self.chains.sponsor_configured() && self.sponsor_account.is_some(),
            self.signer.is_some(),
        )
    }

    #[tracing::instrument(skip_all, fields(user = %request.user, operation = request.operation.as_str()))]
    pub async fn execute_operation(
        &self,
        request: OperationRequest,
    ) -> Result<OperationOutcome, EngineError> {
        // 1. Rate limit. Store failure aborts: execution is never attempted
        // without the guard rails.
        let rate_limit = self.rate_limiter.admit(&request.user).await?;
        if !rate_limit.allowed {
            return Err(EngineError::RateLimitExceeded {
                remaining: rate_limit.remaining,
                reset_at_ms: rate_limit.reset_at_ms,
            });
        }

        // 2. Path selection is pure validation; do it before reserving so a
        // misconfigured request never occupies the operation key.
        let path = self.select_path(
            request.operation,
            request.signed_transaction.is_some(),
            request.gasless,
        )?;

        // 3. Atomic novelty check + reservation.
        let operation_key = OperationKey::derive(
            &request.user,
            request.operation,
            &request.target,
            self.dedup_bucket,
            epoch_ms(),
        );

        let nonce = match self
            .registry
            .validate_and_reserve(&request.user, &operation_key)
            .await?
        {
            ReservationOutcome::Reserved { nonce } => nonce,
            ReservationOutcome::AlreadyCompleted { transaction_hash } => {
                return Err(EngineError::DuplicateOperation {
                    operation_key: operation_key.to_string(),
                    state: DuplicateState::Completed,
                    transaction_hash: transaction_hash.map(|h| format!("{h:#x}")),
                });
            }
            ReservationOutcome::InFlight { age_ms } => {
                tracing::info!(age_ms, "rejecting duplicate in-flight operation");
                return Err(EngineError::DuplicateOperation {
                    operation_key: operation_key.to_string(),
                    state: DuplicateState::InFlight,
                    transaction_hash: None,
                });
            }
            ReservationOutcome::NeedsReconciliation {
                nonce,
                transaction_hash,
            } => {
                return self
                    .reconcile_unknown(&request, &operation_key, nonce, transaction_hash)
                    .await;
            }
        };

        let attempt = TransactionAttempt {
            user_address: request.user,
            operation_key: operation_key.as_str().to_string(),
            nonce: nonce.clone(),
            status: AttemptStatus::Pending,
            created_at: epoch_ms(),
            transaction_hash: None,
        };
        self.registry.register(&attempt).await?;

        tracing::info!(
            operation_key = %operation_key,
            nonce = %nonce,
            path = ?path,
            "attempt registered, executing"
        );

        // 4. Execute on the selected path.
        let call = PreparedCall {
            operation: request.operation,
            transaction: request.transaction.clone(),
        };
        let outcome = match self.run_execution(path, &request, &call).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.registry
                    .mark_failed(&request.user, &operation_key, &nonce, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        // 5. Translate the terminal outcome into registry state.
        match outcome {
            ExecutionOutcome::Confirmed { receipt } => {
                self.settle_confirmed(
                    &request,
                    &operation_key,
                    nonce,
                    receipt.transaction_hash,
                    rate_limit,
                )
                .await
            }
            ExecutionOutcome::Reverted { receipt } => {
                self.registry
                    .mark_failed(
                        &request.user,
                        &operation_key,
                        &nonce,
                        "transaction reverted on-chain",
                    )
                    .await?;
                Err(EngineError::ExecutionError {
                    kind: ExecutionErrorKind::Reverted {
                        message: format!(
                            "transaction {:#x} reverted on-chain",
                            receipt.transaction_hash
                        ),
                    },
                })
            }
            ExecutionOutcome::Unknown { transaction_hash } => {
                self.registry
                    .mark_unknown(
                        &request.user,
                        &operation_key,
                        &nonce,
                        Some(transaction_hash),
                    )
                    .await?;
                Err(EngineError::ExecutionError {
                    kind: ExecutionErrorKind::ReceiptTimeout {
                        transaction_hash: format!("{transaction_hash:#x}"),
                    },
                })
            }
            ExecutionOutcome::Failed { kind } => {
                self.registry
                    .mark_failed(&request.user, &operation_key, &nonce, &kind.to_string())
                    .await?;
                Err(EngineError::ExecutionError { kind })
            }
        }
    }

    /// Runs strictly sequentially; concurrent submissions would collide on
    /// the signing account's nonce.
    pub async fn execute_batch(
        &self,
        requests: Vec<OperationRequest>,
    ) -> Vec<Result<OperationOutcome, EngineError>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute_operation(request).await);
        }
        results
    }

    async fn run_execution(
        &self,
        path: ExecutionPath,
        request: &OperationRequest,
        call: &PreparedCall,
    ) -> Result<ExecutionOutcome, EngineError> {
        let chain = self.chains.chain()?;

        match path {
            ExecutionPath::ClientSigned => {
                let raw_transaction = request.signed_transaction.clone().ok_or_else(|| {
                    EngineError::ValidationError {
                        message: "client-signed path requires signedTransaction".to_string(),
                    }
                })?;
                let submitter = ClientSignedSubmitter {
                    chain,
                    raw_transaction,
                };
                Ok(self.executor.execute(&submitter, call).await)
            }
            ExecutionPath::GasPaid => {
                let signer =
                    self.signer
                        .clone()
                        .ok_or_else(|| EngineError::RpcConfigError {
                            message: "gas-paid path selected without a funded signer".to_string(),
                        })?;
                let submitter = GasPaidSubmitter { chain, signer };
                Ok(self.executor.execute(&submitter, call).await)
            }
            ExecutionPath::Gasless => {
                let sender = self
                    .sponsor_account
                    .ok_or_else(|| EngineError::RpcConfigError {
                        message: "gasless path selected without a sponsor account".to_string(),
                    })?;
                let submitter = GaslessSubmitter {
                    chain,
                    sender,
                    entrypoint: self.entrypoint,
                };
                Ok(self.executor.execute(&submitter, call).await)
            }
        }
    }

    async fn settle_confirmed(
        &self,
        request: &OperationRequest,
        operation_key: &OperationKey,
        nonce: String,
        transaction_hash: B256,
        rate_limit: RateLimitDecision,
    ) -> Result<OperationOutcome, EngineError> {
        let source = ChainReceiptSource {
            chain: self.chains.chain()?,
        };
        let report = self
            .verifier
            .verify(
                &source,
                transaction_hash,
                request.expected_recipient,
                request.expected_token_id,
            )
            .await;

        match report {
            Ok(report) if report.verified => {
                self.registry
                    .mark_completed(&request.user, operation_key, &nonce, transaction_hash)
                    .await?;
                Ok(OperationOutcome {
                    transaction_hash,
                    nonce,
                    rate_limit,
                    verified: Some(true),
                })
            }
            Ok(report) => match request.verification {
                VerificationPolicy::Mandatory => {
                    let detail = report
                        .error
                        .unwrap_or_else(|| "expected on-chain effect not found".to_string());
                    self.registry
                        .mark_failed(&request.user, operation_key, &nonce, &detail)
                        .await?;
                    Err(EngineError::VerificationMismatch {
                        expected: request
                            .expected_token_id
                            .map(|t| format!("token {t} to {:#x}", request.expected_recipient))
                            .unwrap_or_else(|| {
                                format!("transfer to {:#x}", request.expected_recipient)
                            }),
                        actual: detail,
                    })
                }
                VerificationPolicy::Advisory => {
                    tracing::warn!(
                        transaction_hash = %transaction_hash,
                        error = ?report.error,
                        "advisory verification failed; completing anyway"
                    );
                    self.registry
                        .mark_completed(&request.user, operation_key, &nonce, transaction_hash)
                        .await?;
                    Ok(OperationOutcome {
                        transaction_hash,
                        nonce,
                        rate_limit,
                        verified: Some(false),
                    })
                }
            },
            Err(e) => {
                // The transaction IS confirmed; a broken verifier lookup
                // must not un-complete it. Surface the lookup failure for
                // mandatory policies so the caller polls /status.
                tracing::warn!(
                    transaction_hash = %transaction_hash,
                    error = %e,
                    "verification lookup failed after confirmation"
                );
                self.registry
                    .mark_completed(&request.user, operation_key, &nonce, transaction_hash)
                    .await?;
                match request.verification {
                    VerificationPolicy::Mandatory => Err(e),
                    VerificationPolicy::Advisory => Ok(OperationOutcome {
                        transaction_hash,
                        nonce,
                        rate_limit,
                        verified: None,
                    }),
                }
            }
        }
    }

    /// Settle an attempt whose receipt wait timed out, against actual chain
    /// state. Never resubmits: a timed-out transaction may confirm at any
    /// moment.
    async fn reconcile_unknown(
        &self,
        request: &OperationRequest,
        operation_key: &OperationKey,
        nonce: String,
        transaction_hash: Option<B256>,
    ) -> Result<OperationOutcome, EngineError> {
        let Some(transaction_hash) = transaction_hash else {
            // Nothing to check on chain; fail the stale attempt so the key
            // becomes reclaimable on the caller's next request.
            self.registry
                .mark_failed(
                    &request.user,
                    operation_key,
                    &nonce,
                    "submission outcome unknown and no transaction hash recorded",
                )
                .await?;
            return Err(EngineError::DuplicateOperation {
                operation_key: operation_key.to_string(),
                state: DuplicateState::AwaitingReceipt,
                transaction_hash: None,
            });
        };

        let chain = self.chains.chain()?;
        let receipt = chain
            .provider()
            .get_transaction_receipt(transaction_hash)
            .await
            .map_err(|e| e.to_engine_error(&chain))?;

        match receipt {
            Some(receipt) if receipt.status() => {
                tracing::info!(
                    transaction_hash = %transaction_hash,
                    "reconciliation found the timed-out transaction mined"
                );
                self.registry
                    .mark_completed(&request.user, operation_key, &nonce, transaction_hash)
                    .await?;
                Err(EngineError::DuplicateOperation {
                    operation_key: operation_key.to_string(),
                    state: DuplicateState::Completed,
                    transaction_hash: Some(format!("{transaction_hash:#x}")),
                })
            }
            Some(_) => {
                self.registry
                    .mark_failed(
                        &request.user,
                        operation_key,
                        &nonce,
                        "transaction reverted (settled during reconciliation)",
                    )
                    .await?;
                Err(EngineError::ExecutionError {
                    kind: ExecutionErrorKind::Reverted {
                        message: format!(
                            "original attempt {transaction_hash:#x} reverted on-chain; retry the operation"
                        ),
                    },
                })
            }
            None => Err(EngineError::DuplicateOperation {
                operation_key: operation_key.to_string(),
                state: DuplicateState::AwaitingReceipt,
                transaction_hash: Some(format!("{transaction_hash:#x}")),
            }),
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

fn choose_path(
    operation: OperationType,
    has_client_signature: bool,
    gasless: Option<bool>,
    sponsor_available: bool,
    signer_available: bool,
) -> Result<ExecutionPath, EngineError> {
    if operation.is_recipient_sensitive() {
        // Hard rule, not a preference: the submitting account must be the
        // recipient's own key.
        if has_client_signature {
            return Ok(ExecutionPath::ClientSigned);
        }
        return Err(EngineError::ValidationError {
            message: format!(
                "{} operations must be client-signed; supply signedTransaction",
                operation.as_str()
            ),
        });
    }

    if has_client_signature {
        return Ok(ExecutionPath::ClientSigned);
    }

    let prefer_gasless = gasless.unwrap_or(true);
    if prefer_gasless && sponsor_available {
        return Ok(ExecutionPath::Gasless);
    }
    if signer_available {
        return Ok(ExecutionPath::GasPaid);
    }
    if sponsor_available {
        return Ok(ExecutionPath::Gasless);
    }

    Err(EngineError::RpcConfigError {
        message: "no execution path configured: set up the sponsor integration or a funded signer"
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_without_client_signature_is_refused() {
        let err = choose_path(OperationType::ClaimGift, false, Some(true), true, true)
            .expect_err("server-held paths must be refused for claims");

        match err {
            EngineError::ValidationError { message } => {
                assert!(message.contains("client-signed"), "{message}");
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_with_client_signature_uses_client_path() {
        let path = choose_path(OperationType::ClaimGift, true, None, true, true).unwrap();
        assert_eq!(path, ExecutionPath::ClientSigned);
    }

    #[test]
    fn test_mint_prefers_gasless_when_sponsor_configured() {
        let path = choose_path(OperationType::MintTo, false, None, true, true).unwrap();
        assert_eq!(path, ExecutionPath::Gasless);
    }

    #[test]
    fn test_mint_falls_back_to_gas_paid_without_sponsor() {
        let path = choose_path(OperationType::MintTo, false, None, false, true).unwrap();
        assert_eq!(path, ExecutionPath::GasPaid);
    }

    #[test]
    fn test_explicit_gasless_opt_out() {
        let path = choose_path(OperationType::MintTo, false, Some(false), true, true).unwrap();
        assert_eq!(path, ExecutionPath::GasPaid);
    }

    #[test]
    fn test_no_path_configured_is_an_error() {
        let err = choose_path(OperationType::MintTo, false, None, false, false)
            .expect_err("no path should be selectable");

        assert!(matches!(err, EngineError::RpcConfigError { .. }));
    }
}

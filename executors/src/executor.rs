use std::time::Duration;

use alloy::{
    consensus::SignableTransaction,
    network::{TransactionBuilder, TxSignerSync},
    primitives::{Address, B256, Bytes, U256},
    providers::Provider,
    rpc::types::{TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolCall,
};
use giftrelay_core::{
    chain::Chain,
    error::{AlloyRpcErrorToEngineError, EngineError, ExecutionErrorKind},
    operation::OperationType,
    transaction::InnerTransaction,
    userop::SponsoredUserOp,
};
use serde_json::json;

use crate::error_classifier::ExecutionErrorMapper;

sol! {
    /// Smart-account execute wrapper the sponsor path calls into.
    function execute(address target, uint256 value, bytes calldata data);
}

/// A fully prepared call, ready for whichever submitter the router selected.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub operation: OperationType,
    pub transaction: InnerTransaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub transaction_hash: B256,
    pub status: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

impl ReceiptSummary {
    fn from_receipt(receipt: &TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            status: receipt.status(),
            gas_used: receipt.gas_used,
            block_number: receipt.block_number,
        }
    }
}

/// Exactly one terminal outcome per `execute` call. The caller translates
/// this into the dedup registry's terminal marking; the executor itself
/// never touches the registry.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Confirmed { receipt: ReceiptSummary },
    Reverted { receipt: ReceiptSummary },
    /// Submitted, but no receipt arrived within the confirmation timeout.
    /// The transaction may still confirm later; the caller must reconcile
    /// before this intent may be retried.
    Unknown { transaction_hash: B256 },
    Failed { kind: ExecutionErrorKind },
}

/// The submission seam between the executor's retry machinery and a
/// concrete signing/broadcast mechanism.
pub trait CallSubmitter: Send + Sync {
    /// Submit the call and return a submission handle: the transaction hash
    /// for direct submissions, the user-op hash for sponsored ones.
    fn submit(
        &self,
        call: &PreparedCall,
    ) -> impl Future<Output = Result<B256, ExecutionErrorKind>> + Send;

    /// Look up the inclusion receipt for a previously returned handle.
    fn receipt(
        &self,
        handle: B256,
    ) -> impl Future<Output = Result<Option<ReceiptSummary>, EngineError>> + Send;
}

#[derive(Debug, Clone)]
pub struct TransactionExecutor {
    pub max_retries: u32,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for TransactionExecutor {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(3),
        }
    }
}

impl TransactionExecutor {
    /// Submit `call`, retrying transient failures with exponential backoff,
    /// then block until the receipt arrives or the confirmation timeout
    /// elapses.
    ///
    /// Non-retryable failures (revert, insufficient funds, nonce-too-low,
    /// malformed input, already-known) surface immediately regardless of
    /// the retry budget. A timed-out receipt wait yields `Unknown`, never a
    /// resubmission: the transaction may still be mined.
    #[tracing::instrument(skip_all, fields(operation = call.operation.as_str()))]
    pub async fn execute<S: CallSubmitter>(
        &self,
        submitter: &S,
        call: &PreparedCall,
    ) -> ExecutionOutcome {
        let mut attempt = 1u32;

        let handle = loop {
            match submitter.submit(call).await {
                Ok(handle) => break handle,
                Err(kind) if !kind.is_retryable() => {
                    tracing::warn!(error = %kind, attempt, "non-retryable submission failure");
                    return ExecutionOutcome::Failed { kind };
                }
                Err(kind) => {
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            error = %kind,
                            attempt,
                            "transient failure persisted through retry budget"
                        );
                        return ExecutionOutcome::Failed { kind };
                    }

                    let delay = Duration::from_secs(2u64.pow(attempt - 1));
                    tracing::info!(
                        error = %kind,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "transient submission failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        tracing::debug!(handle = %handle, "submission accepted, awaiting receipt");

        match self.wait_for_receipt(submitter, handle).await {
            Some(receipt) if receipt.status => {
                tracing::info!(
                    transaction_hash = %receipt.transaction_hash,
                    gas_used = receipt.gas_used,
                    block_number = ?receipt.block_number,
                    "transaction confirmed"
                );
                ExecutionOutcome::Confirmed { receipt }
            }
            Some(receipt) => {
                tracing::warn!(
                    transaction_hash = %receipt.transaction_hash,
                    "transaction reverted on-chain"
                );
                ExecutionOutcome::Reverted { receipt }
            }
            None => {
                tracing::warn!(handle = %handle, "receipt wait timed out");
                ExecutionOutcome::Unknown {
                    transaction_hash: handle,
                }
            }
        }
    }

    /// Runs strictly sequentially: the submitting account's nonce sequence
    /// cannot tolerate concurrent submissions.
    pub async fn execute_batch<S: CallSubmitter>(
        &self,
        submitter: &S,
        calls: &[PreparedCall],
    ) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.execute(submitter, call).await);
        }
        outcomes
    }

    async fn wait_for_receipt<S: CallSubmitter>(
        &self,
        submitter: &S,
        handle: B256,
    ) -> Option<ReceiptSummary> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            match submitter.receipt(handle).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                // Fetch errors during the wait are absorbed: the timeout is
                // the terminal condition, not a flaky node.
                Err(e) => tracing::warn!(handle = %handle, error = %e, "receipt lookup failed"),
            }

            if tokio::time::Instant::now() + self.receipt_poll_interval > deadline {
                return None;
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

/// Submits via the engine's funded local signer. Fees, gas and the account
/// nonce are filled from the chain at submission time.
pub struct GasPaidSubmitter<C: Chain> {
    pub chain: C,
    pub signer: PrivateKeySigner,
}

impl<C: Chain> CallSubmitter for GasPaidSubmitter<C> {
    async fn submit(&self, call: &PreparedCall) -> Result<B256, ExecutionErrorKind> {
        let provider = self.chain.provider();
        let from = self.signer.address();

        let mut tx_request = TransactionRequest::default()
            .with_from(from)
            .with_value(call.transaction.value)
            .with_input(call.transaction.data.clone())
            .with_chain_id(self.chain.chain_id());

        if let Some(to) = call.transaction.to {
            tx_request = tx_request.with_to(to);
        }

        let fees = provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;
        tx_request = tx_request
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);

        // Estimation simulates the call, so reverts surface here first.
        let gas_limit = match call.transaction.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                let gas = provider
                    .estimate_gas(tx_request.clone())
                    .await
                    .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;
                gas * 110 / 100 // Add 10% buffer
            }
        };
        tx_request = tx_request.with_gas_limit(gas_limit);

        let nonce = provider
            .get_transaction_count(from)
            .await
            .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;

        let mut typed_tx = tx_request.with_nonce(nonce).build_typed_tx().map_err(|e| {
            ExecutionErrorKind::InvalidInput {
                message: format!("Failed to build typed transaction: {}", json!(e)),
            }
        })?;

        let signature = self
            .signer
            .sign_transaction_sync(&mut typed_tx)
            .map_err(|e| ExecutionErrorKind::InvalidInput {
                message: format!("Failed to sign transaction: {e}"),
            })?;
        let signed_tx = typed_tx.into_signed(signature);

        match provider.send_tx_envelope(signed_tx.into()).await {
            Ok(pending_tx) => Ok(*pending_tx.tx_hash()),
            Err(send_error) => Err(ExecutionErrorMapper::map_rpc_error(&send_error)),
        }
    }

    async fn receipt(&self, handle: B256) -> Result<Option<ReceiptSummary>, EngineError> {
        let receipt = self
            .chain
            .provider()
            .get_transaction_receipt(handle)
            .await
            .map_err(|e| e.to_engine_error(&self.chain))?;

        Ok(receipt.as_ref().map(ReceiptSummary::from_receipt))
    }
}

/// Broadcasts a transaction the caller already signed. The engine never
/// holds the key; recipient-sensitive operations are forced through here.
pub struct ClientSignedSubmitter<C: Chain> {
    pub chain: C,
    pub raw_transaction: Bytes,
}

impl<C: Chain> CallSubmitter for ClientSignedSubmitter<C> {
    async fn submit(&self, _call: &PreparedCall) -> Result<B256, ExecutionErrorKind> {
        match self
            .chain
            .provider()
            .send_raw_transaction(&self.raw_transaction)
            .await
        {
            Ok(pending_tx) => Ok(*pending_tx.tx_hash()),
            Err(send_error) => Err(ExecutionErrorMapper::map_rpc_error(&send_error)),
        }
    }

    async fn receipt(&self, handle: B256) -> Result<Option<ReceiptSummary>, EngineError> {
        let receipt = self
            .chain
            .provider()
            .get_transaction_receipt(handle)
            .await
            .map_err(|e| e.to_engine_error(&self.chain))?;

        Ok(receipt.as_ref().map(ReceiptSummary::from_receipt))
    }
}

/// Submits through the sponsored bundler/paymaster integration. The handle
/// this path returns is the user-op hash; the receipt lookup resolves it to
/// the real transaction.
pub struct GaslessSubmitter<C: Chain> {
    pub chain: C,
    /// The sponsor-managed smart account executing on behalf of the engine.
    pub sender: Address,
    pub entrypoint: Address,
}

impl<C: Chain> GaslessSubmitter<C> {
    /// 2D user-op nonce: random upper key, zero sequence. Parallel user ops
    /// from the same sender must not share a nonce key.
    fn generate_userop_nonce() -> U256 {
        use rand::Rng;
        let mut rng = rand::rng();
        let rand1 = rng.random::<u64>();
        let rand2 = rng.random::<u64>();
        let rand3 = rng.random::<u64>();

        U256::from_limbs([0, rand1, rand2, rand3])
    }
}

impl<C: Chain> CallSubmitter for GaslessSubmitter<C> {
    async fn submit(&self, call: &PreparedCall) -> Result<B256, ExecutionErrorKind> {
        let Some(sponsor) = self.chain.sponsor() else {
            return Err(ExecutionErrorKind::InvalidInput {
                message: "sponsor path selected but not configured".to_string(),
            });
        };

        let fees = self
            .chain
            .provider()
            .estimate_eip1559_fees()
            .await
            .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;

        let call_data = executeCall {
            target: call.transaction.to.unwrap_or_default(),
            value: call.transaction.value,
            data: call.transaction.data.clone(),
        }
        .abi_encode();

        let mut user_op = SponsoredUserOp {
            sender: self.sender,
            nonce: Self::generate_userop_nonce(),
            init_code: Bytes::new(),
            call_data: call_data.into(),
            call_gas_limit: U256::from(call.transaction.gas_limit.unwrap_or(500_000)),
            verification_gas_limit: U256::from(150_000u64),
            pre_verification_gas: U256::from(50_000u64),
            max_fee_per_gas: U256::from(fees.max_fee_per_gas),
            max_priority_fee_per_gas: U256::from(fees.max_priority_fee_per_gas),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        };

        let sponsorship = sponsor
            .paymaster_client
            .sponsor_user_op(&user_op, self.entrypoint)
            .await
            .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;

        user_op.paymaster_and_data = sponsorship.paymaster_and_data;
        if let Some(gas) = sponsorship.call_gas_limit {
            user_op.call_gas_limit = gas;
        }
        if let Some(gas) = sponsorship.verification_gas_limit {
            user_op.verification_gas_limit = gas;
        }
        if let Some(gas) = sponsorship.pre_verification_gas {
            user_op.pre_verification_gas = gas;
        }

        let user_op_hash = sponsor
            .bundler_client
            .send_user_op(&user_op, self.entrypoint)
            .await
            .map_err(|e| ExecutionErrorMapper::map_rpc_error(&e))?;

        B256::try_from(user_op_hash.as_ref()).map_err(|_| ExecutionErrorKind::InvalidInput {
            message: format!("bundler returned malformed user-op hash: {user_op_hash}"),
        })
    }

    async fn receipt(&self, handle: B256) -> Result<Option<ReceiptSummary>, EngineError> {
        let Some(sponsor) = self.chain.sponsor() else {
            return Err(EngineError::RpcConfigError {
                message: "sponsor path selected but not configured".to_string(),
            });
        };

        let receipt = sponsor
            .bundler_client
            .get_user_op_receipt(Bytes::copy_from_slice(handle.as_slice()))
            .await
            .map_err(|e| e.to_engine_bundler_error(&self.chain))?;

        Ok(receipt.map(|r| ReceiptSummary {
            transaction_hash: r.receipt.transaction_hash,
            // The outer transaction can succeed while the inner op reverts;
            // the bundler's success flag is authoritative for the op.
            status: r.success && r.receipt.status(),
            gas_used: r.receipt.gas_used,
            block_number: r.receipt.block_number,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    struct ScriptedSubmitter {
        submissions: AtomicU32,
        submit_times: Mutex<Vec<Instant>>,
        /// Outcome for every submission attempt.
        submit_result: Result<B256, ExecutionErrorKind>,
        /// Number of receipt polls that return None before a receipt.
        receipt_after_polls: u32,
        polls: AtomicU32,
        receipt_status: bool,
    }

    impl ScriptedSubmitter {
        fn failing(kind: ExecutionErrorKind) -> Self {
            Self {
                submissions: AtomicU32::new(0),
                submit_times: Mutex::new(Vec::new()),
                submit_result: Err(kind),
                receipt_after_polls: 0,
                polls: AtomicU32::new(0),
                receipt_status: true,
            }
        }

        fn confirming(receipt_after_polls: u32, receipt_status: bool) -> Self {
            Self {
                submissions: AtomicU32::new(0),
                submit_times: Mutex::new(Vec::new()),
                submit_result: Ok(B256::repeat_byte(0x11)),
                receipt_after_polls,
                polls: AtomicU32::new(0),
                receipt_status,
            }
        }
    }

    impl CallSubmitter for ScriptedSubmitter {
        async fn submit(&self, _call: &PreparedCall) -> Result<B256, ExecutionErrorKind> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            self.submit_times.lock().unwrap().push(Instant::now());
            self.submit_result.clone()
        }

        async fn receipt(&self, handle: B256) -> Result<Option<ReceiptSummary>, EngineError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            if poll < self.receipt_after_polls {
                return Ok(None);
            }

            Ok(Some(ReceiptSummary {
                transaction_hash: handle,
                status: self.receipt_status,
                gas_used: 21_000,
                block_number: Some(1),
            }))
        }
    }

    fn call() -> PreparedCall {
        PreparedCall {
            operation: OperationType::MintTo,
            transaction: InnerTransaction {
                to: Some(Address::repeat_byte(0x22)),
                data: Bytes::new(),
                value: U256::ZERO,
                gas_limit: None,
            },
        }
    }

    fn executor(max_retries: u32) -> TransactionExecutor {
        TransactionExecutor {
            max_retries,
            confirmation_timeout: Duration::from_secs(30),
            receipt_poll_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_submits_exactly_once() {
        let submitter = ScriptedSubmitter::failing(ExecutionErrorKind::Reverted {
            message: "execution reverted".to_string(),
        });

        let outcome = executor(3).execute(&submitter, &call()).await;

        assert_eq!(submitter.submissions.load(Ordering::SeqCst), 1);
        match outcome {
            ExecutionOutcome::Failed {
                kind: ExecutionErrorKind::Reverted { .. },
            } => {}
            other => panic!("Expected revert failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retries_with_exponential_backoff() {
        let submitter = ScriptedSubmitter::failing(ExecutionErrorKind::Transient {
            message: "connection reset".to_string(),
        });

        let outcome = executor(3).execute(&submitter, &call()).await;

        assert_eq!(
            submitter.submissions.load(Ordering::SeqCst),
            3,
            "should submit exactly max_retries times"
        );
        match outcome {
            ExecutionOutcome::Failed {
                kind: ExecutionErrorKind::Transient { .. },
            } => {}
            other => panic!("Expected transient failure, got {other:?}"),
        }

        // Backoff schedule is 2^(n-1) seconds after the n-th failure.
        let times = submitter.submit_times.lock().unwrap();
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_receipt_confirms() {
        let submitter = ScriptedSubmitter::confirming(2, true);

        let outcome = executor(3).execute(&submitter, &call()).await;

        match outcome {
            ExecutionOutcome::Confirmed { receipt } => {
                assert!(receipt.status);
                assert_eq!(receipt.transaction_hash, B256::repeat_byte(0x11));
            }
            other => panic!("Expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_is_terminal() {
        let submitter = ScriptedSubmitter::confirming(0, false);

        let outcome = executor(3).execute(&submitter, &call()).await;

        assert_eq!(
            submitter.submissions.load(Ordering::SeqCst),
            1,
            "a revert must never trigger resubmission"
        );
        match outcome {
            ExecutionOutcome::Reverted { receipt } => assert!(!receipt.status),
            other => panic!("Expected revert, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_timeout_yields_unknown() {
        // Receipt never arrives within the 30s timeout.
        let submitter = ScriptedSubmitter::confirming(u32::MAX, true);

        let outcome = executor(3).execute(&submitter, &call()).await;

        assert_eq!(
            submitter.submissions.load(Ordering::SeqCst),
            1,
            "a timeout must never trigger resubmission"
        );
        match outcome {
            ExecutionOutcome::Unknown { transaction_hash } => {
                assert_eq!(transaction_hash, B256::repeat_byte(0x11));
            }
            other => panic!("Expected unknown outcome, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_sequentially() {
        let submitter = ScriptedSubmitter::confirming(0, true);
        let calls = vec![call(), call(), call()];

        let outcomes = executor(1).execute_batch(&submitter, &calls).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(submitter.submissions.load(Ordering::SeqCst), 3);

        // Each submission strictly after the previous call's receipt poll:
        // monotonically non-decreasing submit instants guarantee no overlap.
        let times = submitter.submit_times.lock().unwrap();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}

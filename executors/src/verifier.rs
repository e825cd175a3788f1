use std::time::Duration;

use alloy::{
    primitives::{Address, B256, Log, U256},
    providers::Provider,
    sol,
    sol_types::SolEvent,
};
use giftrelay_core::{
    chain::Chain,
    error::{AlloyRpcErrorToEngineError, EngineError},
};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    event GiftCreated(bytes32 indexed giftId, address indexed creator, uint256 tokenId);
    event GiftClaimed(bytes32 indexed giftId, address indexed claimer, uint256 tokenId);
}

/// The slice of a mined receipt the verifier cares about.
#[derive(Debug, Clone)]
pub struct ReceiptView {
    pub status: bool,
    pub logs: Vec<Log>,
}

/// Receipt lookup seam; the chain-backed implementation is
/// [`ChainReceiptSource`], tests script their own.
pub trait ReceiptSource: Send + Sync {
    fn fetch(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<ReceiptView>, EngineError>> + Send;
}

pub struct ChainReceiptSource<C: Chain> {
    pub chain: C,
}

impl<C: Chain> ReceiptSource for ChainReceiptSource<C> {
    async fn fetch(&self, tx_hash: B256) -> Result<Option<ReceiptView>, EngineError> {
        let receipt = self
            .chain
            .provider()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| e.to_engine_error(&self.chain))?;

        Ok(receipt.map(|receipt| ReceiptView {
            status: receipt.status(),
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDetail {
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
}

#[derive(Debug, Clone, Default)]
pub struct LogScan {
    pub transfers: Vec<TransferDetail>,
    /// Recognised event names, in log order, for reporting.
    pub events: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub verified: bool,
    pub token_id: Option<U256>,
    pub recipient: Option<Address>,
    pub events: Vec<String>,
    pub error: Option<String>,
}

impl VerificationReport {
    fn unverified(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            token_id: None,
            recipient: None,
            events: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Confirms that a mined transaction actually produced the expected
/// on-chain effect: an asset transfer to the expected recipient, carrying
/// the expected token id when one is known up front.
#[derive(Debug, Clone)]
pub struct ChainEventVerifier {
    pub max_fetch_attempts: u32,
    pub fetch_retry_delay: Duration,
}

impl Default for ChainEventVerifier {
    fn default() -> Self {
        Self {
            max_fetch_attempts: 3,
            fetch_retry_delay: Duration::from_secs(2),
        }
    }
}

impl ChainEventVerifier {
    /// Fetch retries tolerate node propagation lag only; this never
    /// resubmits anything.
    pub async fn verify<S: ReceiptSource>(
        &self,
        source: &S,
        tx_hash: B256,
        expected_recipient: Address,
        expected_token_id: Option<U256>,
    ) -> Result<VerificationReport, EngineError> {
        let mut last_error: Option<EngineError> = None;
        let mut view: Option<ReceiptView> = None;

        for attempt in 1..=self.max_fetch_attempts {
            match source.fetch(tx_hash).await {
                Ok(Some(v)) => {
                    view = Some(v);
                    break;
                }
                Ok(None) => {
                    tracing::debug!(%tx_hash, attempt, "receipt not yet available");
                }
                Err(e) => {
                    tracing::warn!(%tx_hash, attempt, error = %e, "receipt fetch failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.max_fetch_attempts {
                tokio::time::sleep(self.fetch_retry_delay).await;
            }
        }

        let view = match view {
            Some(view) => view,
            None => {
                if let Some(e) = last_error {
                    return Err(e);
                }
                return Ok(VerificationReport::unverified(format!(
                    "no receipt for {tx_hash} after {} attempts",
                    self.max_fetch_attempts
                )));
            }
        };

        if !view.status {
            return Ok(VerificationReport::unverified(
                "transaction reverted on-chain",
            ));
        }

        Ok(Self::check_effect(
            scan_logs(&view.logs),
            expected_recipient,
            expected_token_id,
        ))
    }

    fn check_effect(
        scan: LogScan,
        expected_recipient: Address,
        expected_token_id: Option<U256>,
    ) -> VerificationReport {
        let transfer = scan
            .transfers
            .iter()
            .find(|t| t.to == expected_recipient)
            .cloned();

        match transfer {
            None if scan.transfers.is_empty() => VerificationReport {
                verified: false,
                token_id: None,
                recipient: None,
                events: scan.events,
                error: Some("no asset transfer event in receipt".to_string()),
            },
            None => {
                let observed = scan.transfers[0].clone();
                VerificationReport {
                    verified: false,
                    token_id: Some(observed.token_id),
                    recipient: Some(observed.to),
                    events: scan.events,
                    error: Some(format!(
                        "transfer recipient mismatch: expected {expected_recipient:#x}, got {:#x}",
                        observed.to
                    )),
                }
            }
            Some(transfer) => {
                if let Some(expected) = expected_token_id {
                    if transfer.token_id != expected {
                        return VerificationReport {
                            verified: false,
                            token_id: Some(transfer.token_id),
                            recipient: Some(transfer.to),
                            events: scan.events,
                            error: Some(format!(
                                "token id mismatch: expected {expected}, got {}",
                                transfer.token_id
                            )),
                        };
                    }
                }

                VerificationReport {
                    verified: true,
                    token_id: Some(transfer.token_id),
                    recipient: Some(transfer.to),
                    events: scan.events,
                    error: None,
                }
            }
        }
    }
}

/// Extract asset-transfer and escrow domain events from receipt logs by
/// their indexed topics.
pub fn scan_logs(logs: &[Log]) -> LogScan {
    let mut scan = LogScan::default();

    for log in logs {
        let topics = log.data.topics();
        let Some(topic0) = topics.first() else {
            continue;
        };

        if *topic0 == Transfer::SIGNATURE_HASH && topics.len() == 4 {
            scan.transfers.push(TransferDetail {
                from: Address::from_word(topics[1]),
                to: Address::from_word(topics[2]),
                token_id: U256::from_be_bytes(topics[3].0),
            });
            scan.events.push("Transfer".to_string());
        } else if *topic0 == GiftClaimed::SIGNATURE_HASH {
            scan.events.push("GiftClaimed".to_string());
        } else if *topic0 == GiftCreated::SIGNATURE_HASH {
            scan.events.push("GiftCreated".to_string());
        }
    }

    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, address};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NFT: Address = address!("0x00000000000000000000000000000000000000ff");
    const CLAIMER: Address = address!("0x00000000000000000000000000000000000000aa");

    fn transfer_log(to: Address, token_id: u64) -> Log {
        Log {
            address: NFT,
            data: LogData::new_unchecked(
                vec![
                    Transfer::SIGNATURE_HASH,
                    B256::ZERO,
                    to.into_word(),
                    B256::from(U256::from(token_id)),
                ],
                Bytes::new(),
            ),
        }
    }

    fn claimed_log() -> Log {
        Log {
            address: NFT,
            data: LogData::new_unchecked(
                vec![
                    GiftClaimed::SIGNATURE_HASH,
                    B256::repeat_byte(0x01),
                    CLAIMER.into_word(),
                ],
                Bytes::from(B256::from(U256::from(42u64)).to_vec()),
            ),
        }
    }

    struct ScriptedSource {
        responses: Mutex<Vec<Result<Option<ReceiptView>, EngineError>>>,
        fetches: AtomicU32,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Option<ReceiptView>, EngineError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                fetches: AtomicU32::new(0),
            }
        }
    }

    impl ReceiptSource for ScriptedSource {
        async fn fetch(&self, _tx_hash: B256) -> Result<Option<ReceiptView>, EngineError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(None)
            } else {
                responses.remove(0)
            }
        }
    }

    fn verifier() -> ChainEventVerifier {
        ChainEventVerifier {
            max_fetch_attempts: 3,
            fetch_retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_scan_extracts_transfer_and_domain_events() {
        let scan = scan_logs(&[transfer_log(CLAIMER, 42), claimed_log()]);

        assert_eq!(scan.transfers.len(), 1);
        assert_eq!(scan.transfers[0].to, CLAIMER);
        assert_eq!(scan.transfers[0].token_id, U256::from(42u64));
        assert_eq!(scan.events, vec!["Transfer", "GiftClaimed"]);
    }

    #[tokio::test]
    async fn test_token_id_mismatch_fails_verification() {
        let source = ScriptedSource::new(vec![Ok(Some(ReceiptView {
            status: true,
            logs: vec![transfer_log(CLAIMER, 43)],
        }))]);

        let report = verifier()
            .verify(
                &source,
                B256::repeat_byte(0x11),
                CLAIMER,
                Some(U256::from(42u64)),
            )
            .await
            .unwrap();

        assert!(!report.verified);
        assert_eq!(report.token_id, Some(U256::from(43u64)));
        let error = report.error.expect("mismatch must carry an error");
        assert!(error.contains("token id mismatch"), "{error}");
    }

    #[tokio::test]
    async fn test_matching_claim_verifies() {
        let source = ScriptedSource::new(vec![Ok(Some(ReceiptView {
            status: true,
            logs: vec![transfer_log(CLAIMER, 42), claimed_log()],
        }))]);

        let report = verifier()
            .verify(
                &source,
                B256::repeat_byte(0x11),
                CLAIMER,
                Some(U256::from(42u64)),
            )
            .await
            .unwrap();

        assert!(report.verified);
        assert_eq!(report.recipient, Some(CLAIMER));
        assert!(report.events.contains(&"GiftClaimed".to_string()));
    }

    #[tokio::test]
    async fn test_recipient_mismatch_fails_verification() {
        let front_runner = address!("0x00000000000000000000000000000000000000bb");
        let source = ScriptedSource::new(vec![Ok(Some(ReceiptView {
            status: true,
            logs: vec![transfer_log(front_runner, 42)],
        }))]);

        let report = verifier()
            .verify(&source, B256::repeat_byte(0x11), CLAIMER, None)
            .await
            .unwrap();

        assert!(!report.verified);
        assert!(report.error.unwrap().contains("recipient mismatch"));
    }

    #[tokio::test]
    async fn test_fetch_retries_through_propagation_lag() {
        let source = ScriptedSource::new(vec![
            Ok(None),
            Ok(None),
            Ok(Some(ReceiptView {
                status: true,
                logs: vec![transfer_log(CLAIMER, 42)],
            })),
        ]);

        let report = verifier()
            .verify(&source, B256::repeat_byte(0x11), CLAIMER, None)
            .await
            .unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert!(report.verified);
    }

    #[tokio::test]
    async fn test_missing_receipt_after_retries_is_unverified() {
        let source = ScriptedSource::new(vec![Ok(None), Ok(None), Ok(None)]);

        let report = verifier()
            .verify(&source, B256::repeat_byte(0x11), CLAIMER, None)
            .await
            .unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert!(!report.verified);
        assert!(report.error.unwrap().contains("no receipt"));
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_unverified() {
        let source = ScriptedSource::new(vec![Ok(Some(ReceiptView {
            status: false,
            logs: vec![],
        }))]);

        let report = verifier()
            .verify(&source, B256::repeat_byte(0x11), CLAIMER, None)
            .await
            .unwrap();

        assert!(!report.verified);
        assert!(report.error.unwrap().contains("reverted"));
    }
}

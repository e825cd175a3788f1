use std::time::Duration;

use alloy::primitives::{Address, B256};
use giftrelay_core::{error::EngineError, operation::OperationType};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::epoch_ms;

const ATTEMPT_PREFIX: &str = "tx_attempt";
const COMPLETED_PREFIX: &str = "tx_completed";
const FAILED_PREFIX: &str = "tx_failed";
const NONCE_COUNTER_PREFIX: &str = "user_nonce";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Corrupt record under {key}: {message}")]
    CorruptRecord { key: String, message: String },
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::RedisError(e) => EngineError::StoreUnavailable {
                message: e.to_string(),
            },
            RegistryError::CorruptRecord { .. } => EngineError::InternalError {
                message: err.to_string(),
            },
        }
    }
}

/// Deterministic hash identifying one logical intent: user + operation +
/// target + coarse time bucket. Everything the dedup registry stores is
/// keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn derive(
        user: &Address,
        operation: OperationType,
        target: &str,
        bucket: Duration,
        now_ms: u64,
    ) -> Self {
        let bucket_index = now_ms / (bucket.as_millis() as u64).max(1);
        let preimage = format!(
            "{user:#x}:{op}:{target}:{bucket_index}",
            op = operation.as_str()
        );

        OperationKey(hex::encode(Sha256::digest(preimage.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Failed,
    /// Receipt wait timed out; the transaction may still confirm. The key
    /// stays blocked until reconciliation settles it against chain state.
    Unknown,
}

impl AttemptStatus {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Unknown => "unknown",
        }
    }
}

/// One logical operation attempt. Created Pending by the reservation
/// script, flipped to a terminal status exactly once by the executor path,
/// garbage collected only by TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttempt {
    pub user_address: Address,
    pub operation_key: String,
    pub nonce: String,
    pub status: AttemptStatus,
    /// Epoch milliseconds.
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub nonce: String,
    pub operation_key: String,
    pub user_address: Address,
    pub transaction_hash: B256,
    pub completed_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub nonce: String,
    pub operation_key: String,
    pub user_address: Address,
    pub reason: String,
    pub failed_at: u64,
}

/// Result of an atomic reservation attempt for an operation key.
#[derive(Debug, Clone)]
pub enum ReservationOutcome {
    /// The key was free (or held by a reclaimable stale/failed attempt) and
    /// now holds a fresh Pending attempt under this nonce.
    Reserved { nonce: String },
    /// A completed attempt permanently blocks this key within its TTL; the
    /// original hash is the idempotent answer.
    AlreadyCompleted { transaction_hash: Option<B256> },
    /// A pending attempt younger than the grace period holds the key.
    InFlight { age_ms: u64 },
    /// The holding attempt timed out awaiting its receipt. The caller must
    /// reconcile against chain state before the key can move.
    NeedsReconciliation {
        nonce: String,
        transaction_hash: Option<B256>,
    },
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Must exceed the worst plausible confirmation latency: TTL expiry is
    /// the only cleanup the attempt record gets.
    pub attempt_ttl: Duration,
    pub record_ttl: Duration,
    pub pending_grace: Duration,
    pub counter_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            attempt_ttl: Duration::from_secs(300),
            record_ttl: Duration::from_secs(24 * 60 * 60),
            pending_grace: Duration::from_secs(120),
            counter_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Nonce issuance and attempt deduplication over the shared Redis store.
///
/// The store's conditional writes are the only concurrency control in the
/// engine: every state transition that could race (reserve, reclaim, flip
/// to terminal) happens inside a single Lua script.
#[derive(Clone)]
pub struct AttemptRegistry {
    redis: ConnectionManager,
    namespace: Option<String>,
    config: RegistryConfig,
}

impl AttemptRegistry {
    pub fn new(redis: ConnectionManager, namespace: Option<String>, config: RegistryConfig) -> Self {
        Self {
            redis,
            namespace,
            config,
        }
    }

    pub fn pending_grace(&self) -> Duration {
        self.config.pending_grace
    }

    fn prefixed(&self, key: String) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key,
        }
    }

    fn attempt_key(&self, user: &Address, operation_key: &OperationKey) -> String {
        self.prefixed(format!("{ATTEMPT_PREFIX}:{user:#x}:{operation_key}"))
    }

    fn completed_key(&self, nonce: &str) -> String {
        self.prefixed(format!("{COMPLETED_PREFIX}:{nonce}"))
    }

    fn failed_key(&self, nonce: &str) -> String {
        self.prefixed(format!("{FAILED_PREFIX}:{nonce}"))
    }

    fn counter_key(&self, user: &Address) -> String {
        self.prefixed(format!("{NONCE_COUNTER_PREFIX}:{user:#x}"))
    }

    /// Issue a fresh engine nonce for the user: an atomically incremented
    /// per-user counter mixed with the current timestamp, hashed. Unrelated
    /// to the blockchain account nonce.
    pub async fn next_nonce(&self, user: &Address) -> Result<String, RegistryError> {
        let mut conn = self.redis.clone();
        let key = self.counter_key(user);

        let counter: u64 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;
        let _: () = redis::cmd("PEXPIRE")
            .arg(&key)
            .arg(self.config.counter_ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        let preimage = format!("{user:#x}:{counter}:{now}", now = epoch_ms());
        Ok(hex::encode(Sha256::digest(preimage.as_bytes())))
    }

    /// Check novelty of `operation_key` and, if it is free, install a fresh
    /// Pending attempt for it -- in one atomic script.
    ///
    /// The lookup, the grace-period age check and the conditional overwrite
    /// happen server-side so that two racing callers can never both reclaim
    /// a stale attempt: exactly one SET wins, the other caller sees the
    /// winner's fresh record.
    pub async fn validate_and_reserve(
        &self,
        user: &Address,
        operation_key: &OperationKey,
    ) -> Result<ReservationOutcome, RegistryError> {
        let nonce = self.next_nonce(user).await?;
        let now = epoch_ms();

        let attempt = TransactionAttempt {
            user_address: *user,
            operation_key: operation_key.as_str().to_string(),
            nonce: nonce.clone(),
            status: AttemptStatus::Pending,
            created_at: now,
            transaction_hash: None,
        };
        let attempt_json = serde_json::to_string(&attempt).map_err(|e| {
            RegistryError::CorruptRecord {
                key: self.attempt_key(user, operation_key),
                message: e.to_string(),
            }
        })?;

        let script = redis::Script::new(
            r#"
            local attempt_key = KEYS[1]
            local now = tonumber(ARGV[1])
            local grace_ms = tonumber(ARGV[2])
            local ttl_ms = tonumber(ARGV[3])
            local new_attempt = ARGV[4]

            local raw = redis.call('GET', attempt_key)
            if not raw then
                redis.call('SET', attempt_key, new_attempt, 'PX', ttl_ms)
                return {'reserved', '', ''}
            end

            local ok, attempt = pcall(cjson.decode, raw)
            if not ok then
                -- Unreadable record: reclaim rather than wedge the key.
                redis.call('SET', attempt_key, new_attempt, 'PX', ttl_ms)
                return {'reserved', '', ''}
            end

            if attempt.status == 'completed' then
                return {'completed', attempt.transactionHash or '', ''}
            end

            if attempt.status == 'unknown' then
                return {'unknown', attempt.transactionHash or '', attempt.nonce or ''}
            end

            local age = now - (attempt.createdAt or 0)
            if attempt.status == 'pending' and age < grace_ms then
                return {'in_flight', '', tostring(age)}
            end

            -- Failed, or pending past the grace period: presumed abandoned.
            redis.call('SET', attempt_key, new_attempt, 'PX', ttl_ms)
            return {'reserved', '', ''}
            "#,
        );

        let (disposition, hash, extra): (String, String, String) = script
            .key(self.attempt_key(user, operation_key))
            .arg(now)
            .arg(self.config.pending_grace.as_millis() as u64)
            .arg(self.config.attempt_ttl.as_millis() as u64)
            .arg(&attempt_json)
            .invoke_async(&mut self.redis.clone())
            .await?;

        let transaction_hash = if hash.is_empty() {
            None
        } else {
            hash.parse::<B256>().ok()
        };

        let outcome = match disposition.as_str() {
            "reserved" => ReservationOutcome::Reserved { nonce },
            "completed" => ReservationOutcome::AlreadyCompleted { transaction_hash },
            "in_flight" => ReservationOutcome::InFlight {
                age_ms: extra.parse().unwrap_or(0),
            },
            "unknown" => ReservationOutcome::NeedsReconciliation {
                nonce: extra,
                transaction_hash,
            },
            other => {
                return Err(RegistryError::CorruptRecord {
                    key: self.attempt_key(user, operation_key),
                    message: format!("unexpected reservation disposition: {other}"),
                });
            }
        };

        Ok(outcome)
    }

    /// Persist the fully populated Pending attempt, refreshing its TTL.
    /// Called once execution actually starts on a reserved key.
    pub async fn register(&self, attempt: &TransactionAttempt) -> Result<(), RegistryError> {
        let operation_key = OperationKey(attempt.operation_key.clone());
        let key = self.attempt_key(&attempt.user_address, &operation_key);

        let attempt_json =
            serde_json::to_string(attempt).map_err(|e| RegistryError::CorruptRecord {
                key: key.clone(),
                message: e.to_string(),
            })?;

        let mut conn = self.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(attempt_json)
            .arg("PX")
            .arg(self.config.attempt_ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Write the terminal record and flip the attempt in place, atomically.
    ///
    /// The attempt only flips if it still belongs to `nonce` and is not
    /// already terminal: a stale executor that lost its key to reclamation
    /// must not clobber the new owner's state.
    async fn mark_terminal(
        &self,
        user: &Address,
        operation_key: &OperationKey,
        nonce: &str,
        status: AttemptStatus,
        transaction_hash: Option<B256>,
        record_key: String,
        record_json: String,
    ) -> Result<(), RegistryError> {
        let script = redis::Script::new(
            r#"
            local attempt_key = KEYS[1]
            local record_key = KEYS[2]
            local nonce = ARGV[1]
            local status = ARGV[2]
            local tx_hash = ARGV[3]
            local record = ARGV[4]
            local record_ttl_ms = tonumber(ARGV[5])

            local raw = redis.call('GET', attempt_key)
            if raw then
                local ok, attempt = pcall(cjson.decode, raw)
                if ok
                    and attempt.nonce == nonce
                    and (attempt.status == 'pending' or attempt.status == 'unknown')
                then
                    attempt.status = status
                    if tx_hash ~= '' then
                        attempt.transactionHash = tx_hash
                    end
                    redis.call('SET', attempt_key, cjson.encode(attempt), 'KEEPTTL')
                end
            end

            redis.call('SET', record_key, record, 'PX', record_ttl_ms)
            return 1
            "#,
        );

        let _: i64 = script
            .key(self.attempt_key(user, operation_key))
            .key(record_key)
            .arg(nonce)
            .arg(status.as_str())
            .arg(
                transaction_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
            )
            .arg(record_json)
            .arg(self.config.record_ttl.as_millis() as u64)
            .invoke_async(&mut self.redis.clone())
            .await?;

        Ok(())
    }

    pub async fn mark_completed(
        &self,
        user: &Address,
        operation_key: &OperationKey,
        nonce: &str,
        transaction_hash: B256,
    ) -> Result<(), RegistryError> {
        let record = CompletionRecord {
            nonce: nonce.to_string(),
            operation_key: operation_key.as_str().to_string(),
            user_address: *user,
            transaction_hash,
            completed_at: epoch_ms(),
        };
        let record_json =
            serde_json::to_string(&record).map_err(|e| RegistryError::CorruptRecord {
                key: self.completed_key(nonce),
                message: e.to_string(),
            })?;

        self.mark_terminal(
            user,
            operation_key,
            nonce,
            AttemptStatus::Completed,
            Some(transaction_hash),
            self.completed_key(nonce),
            record_json,
        )
        .await
    }

    pub async fn mark_failed(
        &self,
        user: &Address,
        operation_key: &OperationKey,
        nonce: &str,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let record = FailureRecord {
            nonce: nonce.to_string(),
            operation_key: operation_key.as_str().to_string(),
            user_address: *user,
            reason: reason.to_string(),
            failed_at: epoch_ms(),
        };
        let record_json =
            serde_json::to_string(&record).map_err(|e| RegistryError::CorruptRecord {
                key: self.failed_key(nonce),
                message: e.to_string(),
            })?;

        self.mark_terminal(
            user,
            operation_key,
            nonce,
            AttemptStatus::Failed,
            None,
            self.failed_key(nonce),
            record_json,
        )
        .await
    }

    /// Record a receipt-wait timeout. The attempt moves Pending -> Unknown
    /// (keeping its TTL) and keeps blocking the key until reconciliation.
    pub async fn mark_unknown(
        &self,
        user: &Address,
        operation_key: &OperationKey,
        nonce: &str,
        transaction_hash: Option<B256>,
    ) -> Result<bool, RegistryError> {
        let script = redis::Script::new(
            r#"
            local raw = redis.call('GET', KEYS[1])
            if not raw then return 0 end

            local ok, attempt = pcall(cjson.decode, raw)
            if not ok then return 0 end
            if attempt.status ~= 'pending' or attempt.nonce ~= ARGV[1] then
                return 0
            end

            attempt.status = 'unknown'
            if ARGV[2] ~= '' then
                attempt.transactionHash = ARGV[2]
            end
            redis.call('SET', KEYS[1], cjson.encode(attempt), 'KEEPTTL')
            return 1
            "#,
        );

        let flipped: i64 = script
            .key(self.attempt_key(user, operation_key))
            .arg(nonce)
            .arg(
                transaction_hash
                    .map(|h| format!("{h:#x}"))
                    .unwrap_or_default(),
            )
            .invoke_async(&mut self.redis.clone())
            .await?;

        Ok(flipped == 1)
    }

    pub async fn attempt(
        &self,
        user: &Address,
        operation_key: &OperationKey,
    ) -> Result<Option<TransactionAttempt>, RegistryError> {
        let key = self.attempt_key(user, operation_key);
        self.get_json(&key).await
    }

    pub async fn completion(&self, nonce: &str) -> Result<Option<CompletionRecord>, RegistryError> {
        let key = self.completed_key(nonce);
        self.get_json(&key).await
    }

    pub async fn failure(&self, nonce: &str) -> Result<Option<FailureRecord>, RegistryError> {
        let key = self.failed_key(nonce);
        self.get_json(&key).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, RegistryError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| RegistryError::CorruptRecord {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const USER: Address = address!("0x00000000000000000000000000000000000000aa");

    #[test]
    fn test_operation_key_is_deterministic() {
        let bucket = Duration::from_secs(3600);
        let a = OperationKey::derive(&USER, OperationType::ClaimGift, "gift-7", bucket, 1_000_000);
        let b = OperationKey::derive(&USER, OperationType::ClaimGift, "gift-7", bucket, 1_500_000);

        assert_eq!(a, b, "same intent in the same bucket must collide");
    }

    #[test]
    fn test_operation_key_separates_targets_and_operations() {
        let bucket = Duration::from_secs(3600);
        let claim = OperationKey::derive(&USER, OperationType::ClaimGift, "gift-7", bucket, 0);
        let other_gift = OperationKey::derive(&USER, OperationType::ClaimGift, "gift-8", bucket, 0);
        let mint = OperationKey::derive(&USER, OperationType::MintTo, "gift-7", bucket, 0);

        assert_ne!(claim, other_gift);
        assert_ne!(claim, mint);
    }

    #[test]
    fn test_operation_key_rolls_over_with_time_bucket() {
        let bucket = Duration::from_secs(3600);
        let early = OperationKey::derive(&USER, OperationType::ClaimGift, "gift-7", bucket, 0);
        let late = OperationKey::derive(
            &USER,
            OperationType::ClaimGift,
            "gift-7",
            bucket,
            bucket.as_millis() as u64 + 1,
        );

        assert_ne!(early, late);
    }

    #[test]
    fn test_attempt_round_trips_through_json() {
        let attempt = TransactionAttempt {
            user_address: USER,
            operation_key: "abc".into(),
            nonce: "deadbeef".into(),
            status: AttemptStatus::Pending,
            created_at: 42,
            transaction_hash: None,
        };

        let json = serde_json::to_string(&attempt).unwrap();
        // The Lua scripts key off these exact field names.
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"createdAt\":42"));

        let back: TransactionAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nonce, "deadbeef");
    }
}

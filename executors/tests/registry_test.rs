use std::time::Duration;

use alloy::primitives::{Address, B256, address};
use giftrelay_core::error::EngineError;
use giftrelay_executors::registry::{
    AttemptRegistry, OperationKey, RegistryConfig, ReservationOutcome,
};
use giftrelay_core::operation::OperationType;
use redis::aio::ConnectionManager;

const REDIS_URL: &str = "redis://127.0.0.1:6379/";

const USER: Address = address!("0x00000000000000000000000000000000000000aa");

fn test_namespace(prefix: &str) -> String {
    format!("test_{prefix}_{}", uuid::Uuid::new_v4().simple())
}

async fn connection() -> ConnectionManager {
    let client = redis::Client::open(REDIS_URL).expect("Failed to open Redis client");
    ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis")
}

// Helper to clean up Redis keys for a test namespace
async fn cleanup_namespace(conn: &ConnectionManager, namespace: &str) {
    let mut conn = conn.clone();
    let keys: Vec<String> = redis::cmd("KEYS")
        .arg(format!("{namespace}:*"))
        .query_async(&mut conn)
        .await
        .unwrap_or_default();
    if !keys.is_empty() {
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .unwrap_or_default();
    }
}

fn registry(conn: ConnectionManager, namespace: &str, config: RegistryConfig) -> AttemptRegistry {
    AttemptRegistry::new(conn, Some(namespace.to_string()), config)
}

fn claim_key() -> OperationKey {
    OperationKey::derive(
        &USER,
        OperationType::ClaimGift,
        "gift-7",
        Duration::from_secs(3600),
        1_000_000,
    )
}

#[tokio::test]
async fn test_concurrent_reservations_yield_single_winner() {
    let namespace = test_namespace("reg_concurrent");
    let conn = connection().await;
    let registry = registry(conn.clone(), &namespace, RegistryConfig::default());
    let key = claim_key();

    let attempts = (0..8).map(|_| {
        let registry = registry.clone();
        let key = key.clone();
        async move { registry.validate_and_reserve(&USER, &key).await.unwrap() }
    });
    let outcomes = futures::future::join_all(attempts).await;

    let reserved = outcomes
        .iter()
        .filter(|o| matches!(o, ReservationOutcome::Reserved { .. }))
        .count();
    assert_eq!(
        reserved, 1,
        "exactly one concurrent reservation may win, got {outcomes:?}"
    );

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_completed_attempt_returns_original_hash() {
    let namespace = test_namespace("reg_completed");
    let conn = connection().await;
    let registry = registry(conn.clone(), &namespace, RegistryConfig::default());
    let key = claim_key();
    let tx_hash = B256::repeat_byte(0x42);

    let nonce = match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => nonce,
        other => panic!("Expected reservation, got {other:?}"),
    };

    registry
        .mark_completed(&USER, &key, &nonce, tx_hash)
        .await
        .unwrap();

    // The completed attempt permanently blocks the key within its TTL and
    // the original hash is the idempotent answer.
    match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::AlreadyCompleted { transaction_hash } => {
            assert_eq!(transaction_hash, Some(tx_hash));
        }
        other => panic!("Expected completed block, got {other:?}"),
    }

    let record = registry.completion(&nonce).await.unwrap().unwrap();
    assert_eq!(record.transaction_hash, tx_hash);

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_pending_within_grace_is_in_flight() {
    let namespace = test_namespace("reg_inflight");
    let conn = connection().await;
    let registry = registry(conn.clone(), &namespace, RegistryConfig::default());
    let key = claim_key();

    assert!(matches!(
        registry.validate_and_reserve(&USER, &key).await.unwrap(),
        ReservationOutcome::Reserved { .. }
    ));

    match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::InFlight { age_ms } => {
            assert!(age_ms < 120_000);
        }
        other => panic!("Expected in-flight rejection, got {other:?}"),
    }

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_stale_pending_is_reclaimed() {
    let namespace = test_namespace("reg_stale");
    let conn = connection().await;
    let config = RegistryConfig {
        pending_grace: Duration::from_millis(100),
        ..Default::default()
    };
    let registry = registry(conn.clone(), &namespace, config);
    let key = claim_key();

    let first_nonce = match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => nonce,
        other => panic!("Expected reservation, got {other:?}"),
    };

    tokio::time::sleep(Duration::from_millis(150)).await;

    match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => {
            assert_ne!(nonce, first_nonce, "reclaimed attempt must get a fresh nonce");
        }
        other => panic!("Expected stale reclamation, got {other:?}"),
    }

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_failed_attempt_is_reclaimable() {
    let namespace = test_namespace("reg_failed");
    let conn = connection().await;
    let registry = registry(conn.clone(), &namespace, RegistryConfig::default());
    let key = claim_key();

    let nonce = match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => nonce,
        other => panic!("Expected reservation, got {other:?}"),
    };

    registry
        .mark_failed(&USER, &key, &nonce, "execution reverted")
        .await
        .unwrap();

    let record = registry.failure(&nonce).await.unwrap().unwrap();
    assert_eq!(record.reason, "execution reverted");

    assert!(matches!(
        registry.validate_and_reserve(&USER, &key).await.unwrap(),
        ReservationOutcome::Reserved { .. }
    ));

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_unknown_attempt_requires_reconciliation() {
    let namespace = test_namespace("reg_unknown");
    let conn = connection().await;
    let registry = registry(conn.clone(), &namespace, RegistryConfig::default());
    let key = claim_key();
    let tx_hash = B256::repeat_byte(0x13);

    let nonce = match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => nonce,
        other => panic!("Expected reservation, got {other:?}"),
    };

    assert!(registry
        .mark_unknown(&USER, &key, &nonce, Some(tx_hash))
        .await
        .unwrap());

    // The key stays blocked, surfacing the hash to reconcile against.
    match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::NeedsReconciliation {
            nonce: unknown_nonce,
            transaction_hash,
        } => {
            assert_eq!(unknown_nonce, nonce);
            assert_eq!(transaction_hash, Some(tx_hash));
        }
        other => panic!("Expected reconciliation demand, got {other:?}"),
    }

    // Reconciliation found the transaction mined: the attempt settles as
    // completed and keeps blocking with the original hash.
    registry
        .mark_completed(&USER, &key, &nonce, tx_hash)
        .await
        .unwrap();

    match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::AlreadyCompleted { transaction_hash } => {
            assert_eq!(transaction_hash, Some(tx_hash));
        }
        other => panic!("Expected completed block, got {other:?}"),
    }

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_stale_executor_cannot_clobber_reclaimed_key() {
    let namespace = test_namespace("reg_clobber");
    let conn = connection().await;
    let config = RegistryConfig {
        pending_grace: Duration::from_millis(50),
        ..Default::default()
    };
    let registry = registry(conn.clone(), &namespace, config);
    let key = claim_key();

    let stale_nonce = match registry.validate_and_reserve(&USER, &key).await.unwrap() {
        ReservationOutcome::Reserved { nonce } => nonce,
        other => panic!("Expected reservation, got {other:?}"),
    };

    tokio::time::sleep(Duration::from_millis(80)).await;

    // A second request reclaims the stale key.
    assert!(matches!(
        registry.validate_and_reserve(&USER, &key).await.unwrap(),
        ReservationOutcome::Reserved { .. }
    ));

    // The stale executor finishing late must not flip the new owner's
    // attempt; its terminal record still lands for audit.
    registry
        .mark_completed(&USER, &key, &stale_nonce, B256::repeat_byte(0x66))
        .await
        .unwrap();

    let attempt = registry.attempt(&USER, &key).await.unwrap().unwrap();
    assert_ne!(attempt.nonce, stale_nonce);
    assert_eq!(
        attempt.status,
        giftrelay_executors::registry::AttemptStatus::Pending
    );

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_unreachable_store_surfaces_as_store_unavailable() {
    // Port 1 refuses connections; the conversion to EngineError must land
    // on StoreUnavailable so callers abort instead of executing unguarded.
    let client = redis::Client::open("redis://127.0.0.1:1/").expect("URL parses");
    let error = ConnectionManager::new(client)
        .await
        .err()
        .expect("connection must fail");

    match EngineError::from(error) {
        EngineError::StoreUnavailable { .. } => {}
        other => panic!("Expected StoreUnavailable, got {other:?}"),
    }
}

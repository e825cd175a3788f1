use std::time::Duration;

use alloy::primitives::{Address, address};
use giftrelay_executors::rate_limiter::RedisRateLimiter;
use redis::aio::ConnectionManager;

const REDIS_URL: &str = "redis://127.0.0.1:6379/";

const USER_A: Address = address!("0x00000000000000000000000000000000000000aa");
const USER_B: Address = address!("0x00000000000000000000000000000000000000bb");

fn test_namespace(prefix: &str) -> String {
    format!("test_{prefix}_{}", uuid::Uuid::new_v4().simple())
}

async fn connection() -> ConnectionManager {
    let client = redis::Client::open(REDIS_URL).expect("Failed to open Redis client");
    ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis")
}

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

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[tokio::test]
async fn test_window_ceiling_then_lazy_reset() {
    let namespace = test_namespace("rl_window");
    let conn = connection().await;
    let limiter = RedisRateLimiter::new(
        conn.clone(),
        Some(namespace.clone()),
        Duration::from_millis(500),
        3,
    );

    for attempt in 1u32..=3 {
        let decision = limiter.admit(&USER_A).await.unwrap();
        assert!(decision.allowed, "attempt {attempt} should be admitted");
        assert_eq!(decision.remaining, 3 - attempt);
    }

    let rejected = limiter.admit(&USER_A).await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert!(
        rejected.reset_at_ms > epoch_ms(),
        "reset time must be in the future so the caller can back off"
    );

    // The window expires on its own; the next access starts a fresh one.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let fresh = limiter.admit(&USER_A).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 2);

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_users_do_not_share_windows() {
    let namespace = test_namespace("rl_isolated");
    let conn = connection().await;
    let limiter = RedisRateLimiter::new(
        conn.clone(),
        Some(namespace.clone()),
        Duration::from_secs(60),
        1,
    );

    assert!(limiter.admit(&USER_A).await.unwrap().allowed);
    assert!(!limiter.admit(&USER_A).await.unwrap().allowed);

    // Exhausting one user's window must not affect another's.
    assert!(limiter.admit(&USER_B).await.unwrap().allowed);

    cleanup_namespace(&conn, &namespace).await;
}

#[tokio::test]
async fn test_concurrent_attempts_are_counted_exactly() {
    let namespace = test_namespace("rl_concurrent");
    let conn = connection().await;
    let limiter = RedisRateLimiter::new(
        conn.clone(),
        Some(namespace.clone()),
        Duration::from_secs(60),
        5,
    );

    let attempts = (0..8).map(|_| {
        let limiter = limiter.clone();
        async move { limiter.admit(&USER_A).await.unwrap() }
    });
    let decisions = futures::future::join_all(attempts).await;

    let admitted = decisions.iter().filter(|d| d.allowed).count();
    assert_eq!(
        admitted, 5,
        "the atomic counter must admit exactly the ceiling under concurrency"
    );

    cleanup_namespace(&conn, &namespace).await;
}

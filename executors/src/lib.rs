pub mod error_classifier;
pub mod executor;
pub mod rate_limiter;
pub mod registry;
pub mod verifier;

/// Milliseconds since the Unix epoch, the timestamp unit every record in the
/// durable store uses.
pub(crate) fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

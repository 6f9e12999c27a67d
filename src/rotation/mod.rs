// Token rotation core - credential pools, durable store, process-wide rotator

pub mod pool;
pub mod rotator;
pub mod store;
pub mod supervisor;

pub use pool::{CredentialPool, CredentialStats, FailureReason, RotateOutcome, RotationPolicy};
pub use rotator::TokenRotator;
pub use store::{CredentialStore, EnvFileStore};
pub use supervisor::ProcessSupervisor;

/// Classify an upstream failure as a rate limit. A structured status code
/// wins when present; the "429" substring check only applies to errors that
/// carry no status (transport failures), since message matching can
/// false-positive on unrelated text.
pub fn is_rate_limited(status: Option<u16>, message: &str) -> bool {
    match status {
        Some(code) => code == 429,
        None => message.contains("429"),
    }
}

#[cfg(test)]
mod tests {
    use super::is_rate_limited;

    #[test]
    fn status_code_wins_over_message_text() {
        assert!(is_rate_limited(Some(429), ""));
        assert!(!is_rate_limited(Some(500), "body mentions 429 somewhere"));
    }

    #[test]
    fn message_match_is_only_a_fallback() {
        assert!(is_rate_limited(None, "upstream said 429 too many requests"));
        assert!(!is_rate_limited(None, "connection reset by peer"));
    }
}

// Error types shared between the rotation core and the provider adapters

use thiserror::Error;

/// Errors surfaced by provider adapters to the HTTP handlers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The adapter's pool has no usable credential at all.
    #[error("no {provider} credential available")]
    NoCredential { provider: String },

    /// Upstream signaled a rate limit; the pool already rotated, the caller
    /// should re-issue the request against the new active credential.
    #[error("rate limit exceeded, credential rotated, please retry")]
    RateLimited,

    /// Any non-429 upstream failure, passed through untouched.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Whether the caller can recover by simply retrying the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// Errors surfaced by the process-wide token rotator. In-memory rotation
/// state is already committed when either of these is returned.
#[derive(Debug, Error)]
pub enum RotatorError {
    #[error("failed to persist active credential: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("process supervisor restart failed: {0}")]
    Restart(#[source] std::io::Error),
}

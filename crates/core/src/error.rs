//! Error types for the studyloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all studyloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Refinement errors ---
    #[error("Refinement error: {0}")]
    Refine(#[from] RefineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised by provider adapters.
///
/// The failover controller splits these into two classes via
/// [`ProviderError::is_transient`]: transient errors are retried with
/// backoff, permanent errors advance to the next provider immediately.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Quota exhausted for billing period: {0}")]
    QuotaExhausted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this error is worth retrying against the same provider.
    ///
    /// Timeouts, rate limits, network failures, and 5xx/overload responses
    /// are transient. Auth failures, malformed requests (4xx), and exhausted
    /// quotas are permanent and retrying cannot help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::QuotaExhausted(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors from the step refinement flow.
///
/// A refinement failure always leaves the previous step set intact — these
/// errors are reported to the caller, never partially applied.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("Malformed refinement response: {0}")]
    MalformedResponse(String),

    #[error("Step count {count} outside allowed range 1..=12")]
    InvalidStepCount { count: usize },

    #[error("Store error during refinement: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        });
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout("10s".into()).is_transient());
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(ProviderError::Network("conn refused".into()).is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn permanent_classification() {
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
        assert!(!ProviderError::QuotaExhausted("billing".into()).is_transient());
        assert!(!ProviderError::NotConfigured("missing".into()).is_transient());
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "malformed".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn refine_error_displays_count() {
        let err = RefineError::InvalidStepCount { count: 14 };
        assert!(err.to_string().contains("14"));
    }
}

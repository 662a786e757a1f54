//! Error types for the buildloop domain, one enum per collaborator.

use thiserror::Error;

/// Failures of a single call to the reasoning service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key '{key}' in collection '{collection}': {reason}")]
    InvalidKey {
        collection: String,
        key: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted document {collection}/{key}: {reason}")]
    Corrupted {
        collection: String,
        key: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_status() {
        let err = ProviderError::ApiError {
            status_code: 529,
            message: "Overloaded".into(),
        };
        assert!(err.to_string().contains("529"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn timeout_names_the_duration() {
        let err = ProviderError::Timeout(600);
        assert_eq!(err.to_string(), "Request timed out after 600s");
    }

    #[test]
    fn store_error_names_location() {
        let err = StoreError::InvalidKey {
            collection: "plans".into(),
            key: "../etc".into(),
            reason: "path separators are not allowed".into(),
        };
        assert!(err.to_string().contains("plans"));
        assert!(err.to_string().contains("../etc"));
    }
}

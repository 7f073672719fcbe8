// =============================================================================
// ExchangeError — the typed error surface of the FuturesClient contract
// =============================================================================

use std::time::Duration;

use thiserror::Error;

/// Errors a `FuturesClient` (or anything composed over one) can return.
///
/// Internal plumbing (config loading, background task bodies) still uses
/// `anyhow::Result`; this enum exists because callers at the client boundary
/// need to match on a closed set rather than format an opaque error string.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("credentials unavailable for user {user_id}")]
    CredentialUnavailable { user_id: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("rejected by exchange ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ExchangeError {
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// True for errors a caller can reasonably retry after waiting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::CircuitOpen { .. } | Self::TransportFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ExchangeError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ExchangeError::CircuitOpen {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!ExchangeError::invalid_argument("bad leverage").is_retryable());
        assert!(!ExchangeError::rejected(-2010, "insufficient margin").is_retryable());
    }

    #[test]
    fn display_includes_code_for_rejected() {
        let e = ExchangeError::rejected(-4028, "leverage not valid");
        let s = e.to_string();
        assert!(s.contains("-4028"));
        assert!(s.contains("leverage not valid"));
    }
}

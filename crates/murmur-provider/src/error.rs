//! Provider error types.
//!
//! The router's fallback logic keys off [`ProviderError::is_transient`]:
//! timeouts, connection resets, 429s and 5xx responses are retryable;
//! authentication and request-shape failures are not.

use thiserror::Error;

/// Unified error type for provider backends and the router.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider returned a non-success HTTP status.
    #[error("provider `{provider}` returned {status}: {reason}")]
    Http {
        provider: String,
        status: u16,
        reason: String,
    },

    /// The request timed out.
    #[error("provider `{provider}` timed out")]
    Timeout { provider: String },

    /// The connection failed or was reset mid-flight.
    #[error("connection to provider `{provider}` failed: {reason}")]
    Connection { provider: String, reason: String },

    /// Authentication failed (invalid or missing credentials).
    #[error("authentication failed for provider `{provider}`")]
    Auth { provider: String },

    /// The request was rejected as malformed.
    #[error("invalid request to provider `{provider}`: {reason}")]
    InvalidRequest { provider: String, reason: String },

    /// The response could not be parsed into the expected shape.
    #[error("response parse error: {reason}")]
    ParseFailed { reason: String },

    /// The SSE stream was interrupted or produced invalid data.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider `{provider}`")]
    MissingApiKey { provider: String },

    /// No provider in the chain could serve the request.
    #[error("no configured provider available (tried {attempted})")]
    Exhausted { attempted: usize },

    /// The requested provider id is not registered.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },
}

impl ProviderError {
    /// Whether the fallback chain should try another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } | Self::StreamError { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Classify an HTTP status into the right error variant.
pub(crate) fn from_status(provider: &str, status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth {
            provider: provider.to_owned(),
        },
        400 | 404 | 422 => ProviderError::InvalidRequest {
            provider: provider.to_owned(),
            reason: body,
        },
        _ => ProviderError::Http {
            provider: provider.to_owned(),
            status,
            reason: body,
        },
    }
}

/// Map a reqwest error onto the taxonomy.
pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_owned(),
        }
    } else {
        ProviderError::Connection {
            provider: provider.to_owned(),
            reason: err.to_string(),
        }
    }
}

/// Convenience alias used throughout the provider crate.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(from_status("a", 429, String::new()).is_transient());
        assert!(from_status("a", 500, String::new()).is_transient());
        assert!(from_status("a", 503, String::new()).is_transient());
    }

    #[test]
    fn auth_and_bad_request_are_hard() {
        assert!(!from_status("a", 401, String::new()).is_transient());
        assert!(!from_status("a", 400, String::new()).is_transient());
        assert!(matches!(
            from_status("a", 401, String::new()),
            ProviderError::Auth { .. }
        ));
    }

    #[test]
    fn timeout_is_transient() {
        let err = ProviderError::Timeout {
            provider: "a".into(),
        };
        assert!(err.is_transient());
    }
}

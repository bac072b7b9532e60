//! Error types for the authorization-code flow.
//!
//! Every failure a caller of [`ServerSideProtocolClient`](crate::ServerSideProtocolClient)
//! can observe is an [`AuthError`]. Backend failures keep their original
//! [`StoreError`] as the source.

use std::fmt;

use flowgate_store::StoreError;

/// Type alias for flow and session results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while running the authorization-code flow or
/// managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The state store failed. Never retried by this crate.
    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),

    /// No flow state exists for the callback's correlation id.
    ///
    /// Consumed, expired and never-issued correlation ids are reported
    /// identically.
    #[error("State not found")]
    StateNotFound,

    /// The callback does not belong to the flow it claims to continue.
    #[error("State mismatch: {message}")]
    StateMismatch {
        /// What did not match.
        message: String,
    },

    /// Provider metadata could not be fetched or is unusable.
    #[error("Discovery failed: {message}")]
    Discovery {
        /// Description of the failure.
        message: String,
    },

    /// Exchanging the authorization code or validating the returned tokens failed.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Description of the failure.
        message: String,
    },

    /// The provider redirected back with an OAuth `error` parameter.
    #[error("Provider returned error: {error} - {description}")]
    Provider {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// The callback URL is malformed or lacks a required parameter.
    #[error("Invalid callback: {message}")]
    InvalidCallback {
        /// Description of why the callback is invalid.
        message: String,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `StateMismatch` error.
    #[must_use]
    pub fn state_mismatch(message: impl Into<String>) -> Self {
        Self::StateMismatch {
            message: message.into(),
        }
    }

    /// Creates a new `Discovery` error.
    #[must_use]
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    /// Creates a new `Provider` error.
    #[must_use]
    pub fn provider(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Provider {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a new `InvalidCallback` error.
    #[must_use]
    pub fn invalid_callback(message: impl Into<String>) -> Self {
        Self::InvalidCallback {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the state store failed.
    #[must_use]
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns `true` for failures that may indicate forgery or replay.
    #[must_use]
    pub fn is_security_failure(&self) -> bool {
        matches!(self, Self::StateNotFound | Self::StateMismatch { .. })
    }

    /// Returns `true` if the caller should restart the flow from the beginning.
    #[must_use]
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Self::StateNotFound
                | Self::StateMismatch { .. }
                | Self::TokenExchange { .. }
                | Self::Provider { .. }
                | Self::InvalidCallback { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Backend(_) => ErrorCategory::Infrastructure,
            Self::StateNotFound => ErrorCategory::State,
            Self::StateMismatch { .. } => ErrorCategory::State,
            Self::Discovery { .. } => ErrorCategory::Federation,
            Self::TokenExchange { .. } => ErrorCategory::Federation,
            Self::Provider { .. } => ErrorCategory::Federation,
            Self::InvalidCallback { .. } => ErrorCategory::Validation,
            Self::Serialization { .. } => ErrorCategory::Internal,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Categories of flow errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Flow-state lookup or validation failures.
    State,
    /// Failures talking to or reported by the identity provider.
    Federation,
    /// Malformed input.
    Validation,
    /// State store failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Federation => write!(f, "federation"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::StateNotFound.to_string(), "State not found");

        let err = AuthError::state_mismatch("nonce");
        assert_eq!(err.to_string(), "State mismatch: nonce");

        let err = AuthError::provider("access_denied", "user cancelled");
        assert_eq!(
            err.to_string(),
            "Provider returned error: access_denied - user cancelled"
        );

        let err = AuthError::from(StoreError::connection("refused"));
        assert!(err.to_string().starts_with("Backend error:"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::StateNotFound.is_security_failure());
        assert!(AuthError::state_mismatch("x").is_security_failure());
        assert!(!AuthError::token_exchange("x").is_security_failure());

        assert!(AuthError::token_exchange("x").requires_restart());
        assert!(!AuthError::configuration("x").requires_restart());

        let err = AuthError::from(StoreError::connection("refused"));
        assert!(err.is_backend_error());
        assert!(!err.requires_restart());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(AuthError::StateNotFound.category(), ErrorCategory::State);
        assert_eq!(
            AuthError::provider("e", "d").category(),
            ErrorCategory::Federation
        );
        assert_eq!(
            AuthError::from(StoreError::connection("x")).category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::State.to_string(), "state");
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: AuthError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, AuthError::Serialization { .. }));
    }
}

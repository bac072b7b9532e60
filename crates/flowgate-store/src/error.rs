//! Backend error types for the keyed expiring store.
//!
//! Every failure talking to the key-value backend is a [`StoreError`]. The
//! store never retries and never swallows these; they propagate to the caller
//! unchanged.

use std::fmt;
use std::time::Duration;

/// Errors that can occur while communicating with a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No connection to the backend could be obtained.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The backend rejected or failed a command.
    #[error("Backend command {operation} failed: {message}")]
    Command {
        /// The backend operation that failed (e.g. `SET`, `SCAN`).
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The backend did not answer within the configured timeout.
    #[error("Backend command {operation} timed out after {timeout:?}")]
    Timeout {
        /// The backend operation that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A glob pattern could not be compiled.
    #[error("Invalid key pattern {pattern}: {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            operation,
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// Creates a new `InvalidPattern` error.
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the backend did not answer in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if no connection could be established.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Command { .. } => ErrorCategory::Command,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::InvalidPattern { .. } => ErrorCategory::Usage,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            Self::connection(err.to_string())
        } else {
            Self::command("redis", err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::connection(err.to_string())
    }
}

/// Categories of backend errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Could not reach the backend.
    Connection,
    /// The backend failed a command.
    Command,
    /// The backend was too slow.
    Timeout,
    /// The caller passed something unusable.
    Usage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Command => write!(f, "command"),
            Self::Timeout => write!(f, "timeout"),
            Self::Usage => write!(f, "usage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::connection("refused");
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = StoreError::command("SET", "READONLY");
        assert_eq!(err.to_string(), "Backend command SET failed: READONLY");

        let err = StoreError::timeout("GET", Duration::from_millis(250));
        assert!(err.to_string().contains("GET"));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(StoreError::timeout("GET", Duration::from_secs(1)).is_timeout());
        assert!(!StoreError::connection("x").is_timeout());
        assert!(StoreError::connection("x").is_connection());
        assert!(!StoreError::command("DEL", "x").is_connection());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StoreError::connection("x").category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            StoreError::invalid_pattern("[", "unclosed").category(),
            ErrorCategory::Usage
        );
        assert_eq!(ErrorCategory::Timeout.to_string(), "timeout");
    }
}

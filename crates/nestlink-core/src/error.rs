//! Error types for the Nestlink client core
//!
//! Every operation either resolves with data or with one of these errors.
//! Callers that only care about what to do next should look at
//! [`Error::disposition`] rather than matching on variants.

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

use crate::http::error::{Classification, ClientError};
use crate::subscription::protocol::is_auth_rejection;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum Error {
    /// A classified wire failure that survived local recovery
    #[error("Operation '{operation}' failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: ClientError,
    },

    /// The session is gone and the user must sign in again
    #[error("Session ended: {reason}")]
    SessionEnded {
        reason: SessionEndReason,
        #[source]
        source: Option<ClientError>,
    },

    /// The operation cannot be sent as written
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Subscription transport failures
    #[error("Subscription transport error: {message}")]
    Subscription {
        message: String,
        close_code: Option<u16>,
    },

    /// Secret store failures
    #[error("Credential storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// JSON parsing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a session was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// No refresh token was stored
    NoCredentials,
    /// The server refused the refresh token
    Rejected,
    /// The refresh call kept failing transiently and gave up
    RefreshExhausted,
    /// The secret store could not be read or written
    StorageFailure,
}

/// What the caller may do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Transient; the caller may retry manually
    Transient,
    /// Session ended; the user has to re-authenticate
    SessionEnded,
    /// The request is invalid; do not retry
    Invalid,
}

impl Error {
    /// Wrap a classified failure with the operation name it belongs to
    pub fn operation(operation: impl Into<String>, source: ClientError) -> Self {
        Self::Operation {
            operation: operation.into(),
            source,
        }
    }

    /// Create a storage error from any foreign error
    pub fn storage(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error without a source
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// The classified wire failure behind an operation error
    pub fn wire_failure(&self) -> Option<&ClientError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The classification of the underlying wire failure, if any
    pub fn classification(&self) -> Option<Classification> {
        match self {
            Self::Operation { source, .. } => Some(source.classification()),
            Self::SessionEnded { .. } => Some(Classification::Auth),
            _ => None,
        }
    }

    /// Map the error onto the three outcomes a caller can act on
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Operation { source, .. } => match source.classification() {
                Classification::RateLimited
                | Classification::TransientNetwork
                | Classification::Server => Disposition::Transient,
                Classification::Auth => Disposition::SessionEnded,
                Classification::ClientFatal => Disposition::Invalid,
            },
            Self::SessionEnded { .. } => Disposition::SessionEnded,
            Self::Subscription { close_code: Some(code), .. } if is_auth_rejection(*code) => {
                Disposition::SessionEnded
            }
            Self::Subscription { .. } | Self::Storage { .. } => Disposition::Transient,
            Self::InvalidOperation { .. } | Self::Configuration { .. } | Self::Json { .. } => {
                Disposition::Invalid
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Json {
            message: source.to_string(),
            source,
        }
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEndReason::NoCredentials => write!(f, "no stored credentials"),
            SessionEndReason::Rejected => write!(f, "refresh token rejected"),
            SessionEndReason::RefreshExhausted => write!(f, "token refresh exhausted its retries"),
            SessionEndReason::StorageFailure => write!(f, "credential storage unavailable"),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Transient => write!(f, "transient"),
            Disposition::SessionEnded => write!(f, "session-ended"),
            Disposition::Invalid => write!(f, "invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::error::FailureKind;

    fn wire(status: Option<u16>, kind: FailureKind) -> ClientError {
        ClientError {
            kind,
            status_code: status,
            code: None,
            message: "boom".to_string(),
            details: None,
            retry_after: None,
        }
    }

    #[test]
    fn test_operation_disposition_follows_classification() {
        let transient = Error::operation("Supplies", wire(Some(503), FailureKind::Http));
        assert_eq!(transient.disposition(), Disposition::Transient);

        let invalid = Error::operation("Supplies", wire(Some(400), FailureKind::Http));
        assert_eq!(invalid.disposition(), Disposition::Invalid);

        let auth = Error::operation("Supplies", wire(Some(401), FailureKind::Http));
        assert_eq!(auth.disposition(), Disposition::SessionEnded);
    }

    #[test]
    fn test_session_ended_is_terminal() {
        let error = Error::SessionEnded {
            reason: SessionEndReason::RefreshExhausted,
            source: None,
        };
        assert_eq!(error.disposition(), Disposition::SessionEnded);
        assert!(error.to_string().contains("exhausted"));
    }

    #[test]
    fn test_subscription_auth_close_ends_session() {
        let rejected = Error::Subscription {
            message: "unauthorized".to_string(),
            close_code: Some(4401),
        };
        assert_eq!(rejected.disposition(), Disposition::SessionEnded);

        let dropped = Error::Subscription {
            message: "gave up".to_string(),
            close_code: Some(1006),
        };
        assert_eq!(dropped.disposition(), Disposition::Transient);
    }
}

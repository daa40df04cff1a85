//! Error types and handling for the CLI
//!
//! Every error maps to a distinct exit code so scripts can tell a dead
//! session from a flaky network.

use std::io;
use std::path::PathBuf;

use nestlink_core::Disposition;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from nestlink-core
    #[error("{0}")]
    Core(#[from] nestlink_core::Error),

    /// File not found
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Invalid file format
    #[error("Invalid file format for {}: expected {} format", path.display(), expected)]
    InvalidFormat { path: PathBuf, expected: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument combination
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Create a generic error with message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Core(core) => match core.disposition() {
                Disposition::Transient => 2,
                Disposition::SessionEnded => 3,
                Disposition::Invalid => 4,
            },
            Self::FileNotFound { .. } => 5,
            Self::InvalidFormat { .. } => 6,
            Self::Config(_) => 7,
            Self::InvalidArgs(_) => 8,
            Self::Json(_) => 12,
            Self::Yaml(_) => 13,
            Self::Toml(_) => 14,
            Self::Other { .. } => 99,
        }
    }

    /// Check if this error should display usage help
    pub fn should_show_help(&self) -> bool {
        matches!(self, Self::InvalidArgs(_))
    }

    /// A hint on what to do next, if there is an obvious one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Core(core) => match core.disposition() {
                Disposition::SessionEnded => Some("Sign in again with 'nestlink session set'"),
                Disposition::Transient => Some("The failure may be temporary; try again"),
                Disposition::Invalid => None,
            },
            _ => None,
        }
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    let mut message = if use_color {
        use colored::Colorize;
        format!("{} {}", "Error:".red().bold(), error)
    } else {
        format!("Error: {}", error)
    };

    if let Some(hint) = error.hint() {
        message.push_str(&format!("\n{}", hint));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestlink_core::{ClientError, SessionEndReason};

    #[test]
    fn test_exit_codes_follow_disposition() {
        let ended = Error::from(nestlink_core::Error::SessionEnded {
            reason: SessionEndReason::Rejected,
            source: None,
        });
        assert_eq!(ended.exit_code(), 3);

        let flaky = Error::from(nestlink_core::Error::operation("Me", ClientError::network("reset")));
        assert_eq!(flaky.exit_code(), 2);

        let invalid = Error::from(nestlink_core::Error::InvalidOperation {
            message: "bad".to_string(),
        });
        assert_eq!(invalid.exit_code(), 4);
    }

    #[test]
    fn test_format_error_without_color() {
        let error = Error::config("missing endpoint");
        assert_eq!(format_error(&error, false), "Error: Configuration error: missing endpoint");

        let ended = Error::from(nestlink_core::Error::SessionEnded {
            reason: SessionEndReason::NoCredentials,
            source: None,
        });
        assert!(format_error(&ended, false).contains("nestlink session set"));
    }
}

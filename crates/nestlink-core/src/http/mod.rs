//! Request/response side of the pipeline
//!
//! This module provides the HTTP stages:
//! - Error classification of failed attempts
//! - Retry with rate-limit aware backoff
//! - Per-kind attempt timeouts
//! - Auth recovery with a single replay
//! - The reqwest-based transport

pub mod error;
pub mod recovery;
pub mod retry;
pub mod timeout;
pub mod transport;

pub use error::{classify, Classification, ClientError, FailureKind};
pub use recovery::AuthRecoveryLink;
pub use retry::{RetryDecision, RetryLink, RetryPolicy};
pub use timeout::TimeoutConfig;
pub use transport::HttpTransport;

// Re-export commonly used types
pub use reqwest::header::HeaderMap;
pub use reqwest::StatusCode;

//! Error classification for failed operations
//!
//! A [`ClientError`] records the *shape* of a failure (status, structured
//! code, transport kind). [`classify`] turns that shape into the label that
//! drives retry and auth-recovery decisions. Classification never performs I/O.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::operation::GraphQlError;

/// Classification of failed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Authentication required or invalid - handled by auth recovery
    Auth,
    /// Rate limiting - retry with backoff
    RateLimited,
    /// Connection-level failure without an HTTP response - retry
    TransientNetwork,
    /// Server errors (5xx) - retry
    Server,
    /// Forbidden or invalid request - never retry
    ClientFatal,
}

impl Classification {
    /// Check if the generic retry stage may re-issue the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Classification::RateLimited
                | Classification::TransientNetwork
                | Classification::Server
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Auth => "AUTH",
            Classification::RateLimited => "RATE_LIMITED",
            Classification::TransientNetwork => "TRANSIENT_NETWORK",
            Classification::Server => "SERVER",
            Classification::ClientFatal => "CLIENT_FATAL",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the exchange the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-success HTTP status
    Http,
    /// Structured error inside a GraphQL envelope
    GraphQl,
    /// Connection could not be made or was dropped
    Network,
    /// The attempt exceeded its deadline
    Timeout,
    /// The response body could not be decoded
    Decode,
}

/// Normalized wire failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientError {
    /// Where the failure happened
    pub kind: FailureKind,
    /// HTTP status code if available
    pub status_code: Option<u16>,
    /// Structured API error code (`extensions.code`)
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    pub details: Option<Value>,
    /// Retry-After header value in seconds if present
    pub retry_after: Option<u64>,
}

impl ClientError {
    /// Create from a non-success reqwest Response
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());

        let body = response.text().await.unwrap_or_default();
        let details = serde_json::from_str::<Value>(&body).ok();
        let (code, message) = Self::extract_api_error(&details, &body, status);

        Self {
            kind: FailureKind::Http,
            status_code: Some(status.as_u16()),
            code,
            message,
            details,
            retry_after,
        }
    }

    /// Create from a network/request error
    pub fn from_request_error(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_decode() {
            FailureKind::Decode
        } else if error.is_builder() {
            FailureKind::Http
        } else {
            FailureKind::Network
        };

        Self {
            kind,
            status_code: error.status().map(|s| s.as_u16()),
            code: None,
            message: error.to_string(),
            details: None,
            retry_after: None,
        }
    }

    /// The attempt ran past its deadline
    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            status_code: None,
            code: None,
            message: format!("operation timed out after {}ms", after.as_millis()),
            details: None,
            retry_after: None,
        }
    }

    /// A connection-level failure
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            status_code: None,
            code: None,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// A body that could not be decoded
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Decode,
            status_code: None,
            code: None,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// Build from the `errors` array of a GraphQL envelope.
    ///
    /// An authentication error anywhere in the list wins; otherwise the
    /// first error supplies the code and message.
    pub fn from_graphql_errors(errors: &[GraphQlError]) -> Self {
        let primary = errors
            .iter()
            .find(|e| e.code().map(is_auth_code).unwrap_or(false))
            .or_else(|| errors.first());

        let (code, message) = match primary {
            Some(error) => (error.code().map(str::to_string), error.message.clone()),
            None => (None, "GraphQL response contained no data".to_string()),
        };

        Self {
            kind: FailureKind::GraphQl,
            status_code: None,
            code,
            message,
            details: serde_json::to_value(errors).ok(),
            retry_after: None,
        }
    }

    /// Extract the API error code and message from a response body
    fn extract_api_error(
        details: &Option<Value>,
        body: &str,
        status: StatusCode,
    ) -> (Option<String>, String) {
        if let Some(json) = details {
            // GraphQL envelope
            if let Some(first) = json.get("errors").and_then(|e| e.get(0)) {
                let code = first
                    .pointer("/extensions/code")
                    .and_then(|c| c.as_str())
                    .map(|s| s.to_string());
                let message = first
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or(body)
                    .to_string();
                return (code, message);
            }

            // Plain `{ "error": ..., "message": ... }` gateway format
            if let Some(message) = json.get("message").and_then(|m| m.as_str()) {
                let code = json.get("error").and_then(|c| c.as_str()).map(|s| s.to_string());
                return (code, message.to_string());
            }
        }

        if body.is_empty() {
            let reason = status.canonical_reason().unwrap_or("unknown status");
            return (None, format!("HTTP {} {}", status.as_u16(), reason));
        }

        (None, body.to_string())
    }

    /// Get the error classification
    pub fn classification(&self) -> Classification {
        classify(self)
    }

    /// Server-provided delay, if any
    pub fn retry_after_hint(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }
}

/// Classify a failure by inspecting its shape.
///
/// HTTP 401/429/5xx are decisive. Otherwise a recognised structured code
/// decides, and the transport kind is the fallback: connection failures and
/// timeouts are transient, anything else that reached the server is fatal.
pub fn classify(error: &ClientError) -> Classification {
    match error.status_code {
        Some(401) => return Classification::Auth,
        Some(429) => return Classification::RateLimited,
        Some(status) if (500..=599).contains(&status) => return Classification::Server,
        _ => {}
    }

    if let Some(classification) = error.code.as_deref().and_then(classify_code) {
        return classification;
    }

    match error.kind {
        FailureKind::Network | FailureKind::Timeout => Classification::TransientNetwork,
        FailureKind::Decode => Classification::Server,
        FailureKind::Http | FailureKind::GraphQl => Classification::ClientFatal,
    }
}

/// Classify a structured API error code
fn classify_code(code: &str) -> Option<Classification> {
    if is_auth_code(code) {
        return Some(Classification::Auth);
    }
    match code.to_ascii_uppercase().as_str() {
        "FORBIDDEN" => Some(Classification::ClientFatal),
        "RATE_LIMITED" | "TOO_MANY_REQUESTS" => Some(Classification::RateLimited),
        "INTERNAL_SERVER_ERROR" | "SERVICE_UNAVAILABLE" => Some(Classification::Server),
        _ => None,
    }
}

/// Check whether a structured code means "authentication required/invalid"
pub fn is_auth_code(code: &str) -> bool {
    matches!(
        code.to_ascii_uppercase().as_str(),
        "UNAUTHENTICATED" | "AUTHENTICATION_REQUIRED" | "INVALID_TOKEN" | "TOKEN_EXPIRED"
    )
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (classification: {})",
            self.status_code
                .map(|c| c.to_string())
                .or_else(|| self.code.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            self.message,
            self.classification()
        )
    }
}

impl std::error::Error for ClientError {}

//! GraphQL operations, wire envelopes and per-dispatch attempts

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::http::error::{is_auth_code, Classification, ClientError};

/// The three GraphQL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Infer the kind from the first keyword of a document.
    ///
    /// Shorthand selections (`{ ... }`) are queries.
    pub fn infer(document: &str) -> Self {
        let first = document
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == '{' || c == '('))
            .find(|token| !token.is_empty());

        match first {
            Some("mutation") => OperationKind::Mutation,
            Some("subscription") => OperationKind::Subscription,
            _ => OperationKind::Query,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// A single GraphQL query, mutation or subscription request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub query: String,
    #[serde(default = "empty_variables")]
    pub variables: Value,
    pub operation_name: Option<String>,
}

fn empty_variables() -> Value {
    Value::Object(Default::default())
}

impl Operation {
    pub fn new(kind: OperationKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            variables: empty_variables(),
            operation_name: None,
        }
    }

    pub fn query(document: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, document)
    }

    pub fn mutation(document: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, document)
    }

    pub fn subscription(document: impl Into<String>) -> Self {
        Self::new(OperationKind::Subscription, document)
    }

    /// Build from a document, inferring its kind
    pub fn from_document(document: impl Into<String>) -> Self {
        let document = document.into();
        Self::new(OperationKind::infer(&document), document)
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("anonymous")
    }

    /// The JSON body sent over HTTP and inside `subscribe` frames
    pub fn body(&self) -> GraphQlRequest<'_> {
        GraphQlRequest {
            query: &self.query,
            variables: &self.variables,
            operation_name: self.operation_name.as_deref(),
        }
    }
}

/// `{query, variables, operationName}` request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest<'a> {
    pub query: &'a str,
    pub variables: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
}

/// One entry of the GraphQL `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    /// The structured `extensions.code`, if present
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(|code| code.as_str())
    }
}

/// Standard `{data, errors}` response envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    /// Decide whether an envelope is a success or a classified failure.
    ///
    /// Authentication errors fail the operation even when partial data is
    /// present. Other errors only fail it when `data` is null.
    pub fn into_result(self) -> Result<Self, ClientError> {
        if self.errors.is_empty() {
            return Ok(self);
        }

        let has_auth_error = self
            .errors
            .iter()
            .any(|e| e.code().map(is_auth_code).unwrap_or(false));
        let has_data = self.data.as_ref().map(|d| !d.is_null()).unwrap_or(false);

        if has_auth_error || !has_data {
            return Err(ClientError::from_graphql_errors(&self.errors));
        }
        Ok(self)
    }
}

/// One dispatch of an operation.
///
/// Attempts are values: a retry or a replay is a new attempt derived from
/// the previous one, never a mutation of it.
#[derive(Debug, Clone)]
pub struct OperationAttempt {
    operation: Arc<Operation>,
    attempt_number: u32,
    auth_replay: bool,
    classification: Option<Classification>,
    retry_after: Option<Duration>,
}

impl OperationAttempt {
    /// First attempt of an operation
    pub fn first(operation: Operation) -> Self {
        Self {
            operation: Arc::new(operation),
            attempt_number: 1,
            auth_replay: false,
            classification: None,
            retry_after: None,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// 1-based attempt counter
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    /// Whether this attempt is the single replay after auth recovery
    pub fn is_auth_replay(&self) -> bool {
        self.auth_replay
    }

    pub fn classification(&self) -> Option<Classification> {
        self.classification
    }

    pub fn retry_after_hint(&self) -> Option<Duration> {
        self.retry_after
    }

    /// This attempt annotated with the failure it ended in
    pub fn failed(&self, error: &ClientError) -> Self {
        Self {
            classification: Some(error.classification()),
            retry_after: error.retry_after_hint(),
            ..self.clone()
        }
    }

    /// The next sequential attempt of the same operation
    pub fn next(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            attempt_number: self.attempt_number + 1,
            auth_replay: self.auth_replay,
            classification: None,
            retry_after: None,
        }
    }

    /// The replay issued after a successful token refresh
    pub fn auth_replay(&self) -> Self {
        Self {
            operation: Arc::clone(&self.operation),
            attempt_number: 1,
            auth_replay: true,
            classification: None,
            retry_after: None,
        }
    }
}

/// What flows between pipeline stages: an attempt plus the headers
/// accumulated so far
#[derive(Debug, Clone)]
pub struct Request {
    pub attempt: OperationAttempt,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            attempt: OperationAttempt::first(operation),
            headers: HeaderMap::new(),
        }
    }

    pub fn operation(&self) -> &Operation {
        self.attempt.operation()
    }

    /// Same headers, next attempt
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt.next(),
            headers: self.headers.clone(),
        }
    }

    /// Same headers, auth replay attempt
    pub fn replay(&self) -> Self {
        Self {
            attempt: self.attempt.auth_replay(),
            headers: self.headers.clone(),
        }
    }

    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self {
            attempt: self.attempt,
            headers,
        }
    }
}

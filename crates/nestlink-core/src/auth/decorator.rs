//! Auth decorator stage
//!
//! Attaches the fixed compliance headers and the current bearer token to
//! every outbound operation. The token is read at send time, after any
//! needed refresh, never cached between attempts.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::auth::refresh::RefreshController;
use crate::link::{Link, SharedLink};
use crate::operation::{GraphQlResponse, Request};
use crate::{Error, Result};

/// Fixed identification headers sent with every request and every
/// subscription handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplianceHeaders(BTreeMap<String, String>);

impl Default for ComplianceHeaders {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("x-client-name".to_string(), "nestlink".to_string());
        headers.insert(
            "x-client-version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        headers.insert(
            "x-client-platform".to_string(),
            std::env::consts::OS.to_string(),
        );
        Self(headers)
    }
}

impl ComplianceHeaders {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self(headers)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Convert to HTTP headers, rejecting names or values HTTP cannot carry
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::config(format!("Invalid compliance header name '{}'", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                Error::config(format!("Invalid value for compliance header '{}'", name))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// The headers as a JSON object, for subscription connection params
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }
}

/// `Bearer <token>` header value, marked sensitive
pub fn bearer(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        Error::InvalidOperation {
            message: "stored access token cannot be sent as a header".to_string(),
        }
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Stage that decorates requests with compliance headers and the bearer token
pub struct AuthLink {
    inner: SharedLink,
    controller: RefreshController,
    headers: HeaderMap,
    buffer: Duration,
}

impl AuthLink {
    pub fn new(
        inner: SharedLink,
        controller: RefreshController,
        headers: HeaderMap,
        buffer: Duration,
    ) -> Self {
        Self {
            inner,
            controller,
            headers,
            buffer,
        }
    }
}

#[async_trait]
impl Link for AuthLink {
    async fn execute(&self, request: Request) -> Result<GraphQlResponse> {
        let mut headers = request.headers.clone();
        for (name, value) in &self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        match self.controller.ensure_valid_token(self.buffer).await? {
            Some(token) => {
                headers.insert(AUTHORIZATION, bearer(&token)?);
            }
            None => {
                headers.remove(AUTHORIZATION);
                debug!(operation = %request.operation().name(), "No session, sending unauthenticated");
            }
        }

        self.inner.execute(request.with_headers(headers)).await
    }
}

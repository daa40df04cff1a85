//! Client configuration
//!
//! Every field has a default, so a config file or environment only needs to
//! name what it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::auth::decorator::ComplianceHeaders;
use crate::auth::refresh::RefreshPolicy;
use crate::endpoint::{parse_http_endpoint, subscription_url, validate_pair};
use crate::http::retry::RetryPolicy;
use crate::http::timeout::TimeoutConfig;
use crate::subscription::manager::ReconnectPolicy;
use crate::{Error, Result};

pub const ENV_ENDPOINT: &str = "NESTLINK_ENDPOINT";
pub const ENV_SUBSCRIPTION_ENDPOINT: &str = "NESTLINK_SUBSCRIPTION_ENDPOINT";
pub const ENV_REFRESH_BUFFER_MINUTES: &str = "NESTLINK_REFRESH_BUFFER_MINUTES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP GraphQL endpoint
    pub endpoint: String,
    /// Explicit WebSocket endpoint; derived from `endpoint` when absent
    pub subscription_endpoint: Option<String>,
    pub compliance_headers: ComplianceHeaders,
    /// Refresh access tokens that expire within this many minutes
    pub refresh_buffer_minutes: u64,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
    pub refresh: RefreshPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000/graphql".to_string(),
            subscription_endpoint: None,
            compliance_headers: ComplianceHeaders::default(),
            refresh_buffer_minutes: 5,
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            refresh: RefreshPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by the environment (a `.env` file is read first)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            debug!(endpoint = %endpoint, "Endpoint from environment");
            self.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup(ENV_SUBSCRIPTION_ENDPOINT) {
            self.subscription_endpoint = Some(endpoint);
        }
        if let Some(minutes) = lookup(ENV_REFRESH_BUFFER_MINUTES) {
            self.refresh_buffer_minutes = minutes.trim().parse().map_err(|e| Error::Configuration {
                message: format!("{} must be a whole number of minutes", ENV_REFRESH_BUFFER_MINUTES),
                source: Some(anyhow::Error::new(e)),
            })?;
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        parse_http_endpoint(&self.endpoint)
    }

    /// The WebSocket endpoint: the explicit one if set, else derived
    pub fn subscription_url(&self) -> Result<Url> {
        let http = self.endpoint_url()?;
        match &self.subscription_endpoint {
            Some(explicit) => {
                let ws = Url::parse(explicit).map_err(|e| {
                    Error::config(format!("Invalid subscription endpoint '{}': {}", explicit, e))
                })?;
                validate_pair(&http, &ws)?;
                Ok(ws)
            }
            None => subscription_url(&http),
        }
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_minutes.saturating_mul(60))
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.subscription_url()?;
        self.compliance_headers.to_header_map()?;
        self.timeouts.validate().map_err(Error::config)?;
        self.retry.validate().map_err(Error::config)?;
        self.reconnect.validate().map_err(Error::config)?;
        Ok(())
    }
}

//! Per-operation timeouts
//!
//! Every attempt carries a deadline that depends on the operation kind.
//! Expiry cancels the attempt and surfaces a transient timeout failure.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::operation::OperationKind;

/// Timeout configuration, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a query attempt
    pub query_ms: u64,
    /// Deadline for a mutation attempt
    pub mutation_ms: u64,
    /// Time allowed to open a connection (HTTP connect and WebSocket handshake)
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_ms: 8_000,
            mutation_ms: 10_000,
            connect_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    /// Deadline for one attempt of an operation of this kind
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Mutation => Duration::from_millis(self.mutation_ms),
            OperationKind::Query | OperationKind::Subscription => {
                Duration::from_millis(self.query_ms)
            }
        }
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// Validate timeout configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.query_ms == 0 || self.mutation_ms == 0 {
            return Err("Operation timeouts cannot be zero".to_string());
        }
        if self.connect_ms == 0 {
            return Err("Connect timeout cannot be zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_per_kind() {
        let config = TimeoutConfig::default();
        assert_eq!(config.for_kind(OperationKind::Query), Duration::from_secs(8));
        assert_eq!(config.for_kind(OperationKind::Mutation), Duration::from_secs(10));
        assert_eq!(config.connect(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let config = TimeoutConfig {
            query_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TimeoutConfig = serde_json::from_str(r#"{ "query_ms": 2500 }"#).unwrap();
        assert_eq!(config.query_ms, 2500);
        assert_eq!(config.mutation_ms, 10_000);
    }
}

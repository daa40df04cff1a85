//! Nestlink Core - resilient GraphQL network client
//!
//! This crate sits between application code and a GraphQL API. Every query
//! and mutation passes through a pipeline of stages before reaching the wire;
//! subscriptions share one persistent WebSocket instead.
//!
//! # Main Components
//!
//! - **Credentials**: the secret store contract and the session it holds
//! - **Auth**: token expiry checks, a de-duplicated refresh controller and
//!   the stage that attaches the bearer token
//! - **HTTP**: error classification, retry with backoff, auth recovery and
//!   the reqwest transport
//! - **Subscriptions**: the graphql-transport-ws connection manager
//! - **Client**: [`NestClient`], which wires the above together
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nestlink_core::{ClientConfig, MemorySecretStore, NestClient, Operation, Result};
//!
//! async fn example() -> Result<()> {
//!     let config = ClientConfig::new("https://api.example.com/graphql");
//!     let client = NestClient::new(config, Arc::new(MemorySecretStore::new()))?;
//!     let response = client.execute(Operation::query("{ supplies { id } }")).await?;
//!     println!("{:?}", response.data);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod link;
pub mod operation;
pub mod subscription;

// Re-export main types for convenience
pub use client::{Dispatch, NestClient, NestClientBuilder, Route};
pub use config::ClientConfig;
pub use error::{Disposition, Error, Result, SessionEndReason};
pub use operation::{GraphQlError, GraphQlResponse, Operation, OperationAttempt, OperationKind};

pub use auth::{ComplianceHeaders, RefreshController, RefreshOutcome, RefreshPayload, RefreshPolicy, RefreshTransport};
pub use credentials::{redact_token, CredentialAccessor, FileSecretStore, MemorySecretStore, SecretStore, Session};
pub use http::{Classification, ClientError, FailureKind, RetryPolicy, TimeoutConfig};
pub use link::{Link, SharedLink};
pub use subscription::{ConnectionState, ReconnectPolicy, SubscriptionManager, SubscriptionStream};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Credential access over an external secret store
//!
//! The store itself is an external collaborator; this module defines the
//! contract it must satisfy plus two implementations (in-memory and a JSON
//! file) and the [`CredentialAccessor`] that the rest of the pipeline reads
//! through.

mod file;
mod memory;

pub use file::FileSecretStore;
pub use memory::MemorySecretStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::expiry::token_expiry;
use crate::Result;

/// An access/refresh token pair and the access token's expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_epoch_seconds: i64,
}

impl Session {
    /// Build a session, reading the expiry from the access token's claims.
    ///
    /// Tokens without a readable `exp` get an expiry of 0.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let expires_at_epoch_seconds = token_expiry(&access_token).unwrap_or(0);
        Self {
            access_token,
            refresh_token: refresh_token.into(),
            expires_at_epoch_seconds,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &redact_token(&self.access_token))
            .field("refresh_token", &redact_token(&self.refresh_token))
            .field("expires_at_epoch_seconds", &self.expires_at_epoch_seconds)
            .finish()
    }
}

/// Render a token for logs: a short prefix and a mask
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}***", prefix)
}

/// Contract of the external key/value secret store.
///
/// Every method is assumed atomic per key. Implementations that can write
/// both tokens in one step should override [`SecretStore::set_session`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_access_token(&self) -> Result<Option<String>>;

    async fn get_refresh_token(&self) -> Result<Option<String>>;

    async fn set_access_token(&self, token: &str) -> Result<()>;

    async fn set_refresh_token(&self, token: &str) -> Result<()>;

    async fn clear_session(&self) -> Result<()>;

    /// Expiry written with the last full pair, for stores that keep one.
    ///
    /// Writing only the access token must drop it.
    async fn get_expires_at(&self) -> Result<Option<i64>> {
        Ok(None)
    }

    /// Persist a full pair.
    ///
    /// The default writes the refresh token first so a reader never sees a
    /// new access token next to a refresh token that was already rotated away.
    async fn set_session(&self, session: &Session) -> Result<()> {
        self.set_refresh_token(&session.refresh_token).await?;
        self.set_access_token(&session.access_token).await
    }
}

/// Reads and writes tokens through the secret store.
///
/// Values are never cached: every read goes to the store so that readers
/// always see the latest persisted pair.
#[derive(Clone)]
pub struct CredentialAccessor {
    store: Arc<dyn SecretStore>,
}

impl CredentialAccessor {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub async fn access_token(&self) -> Result<Option<String>> {
        self.store.get_access_token().await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>> {
        self.store.get_refresh_token().await
    }

    /// The full stored session, if both tokens are present.
    ///
    /// A stored expiry wins over the one read from the access token.
    pub async fn session(&self) -> Result<Option<Session>> {
        let access = self.store.get_access_token().await?;
        let refresh = self.store.get_refresh_token().await?;
        let (Some(access), Some(refresh)) = (access, refresh) else {
            return Ok(None);
        };

        let mut session = Session::new(access, refresh);
        if let Some(expires_at) = self.store.get_expires_at().await? {
            session.expires_at_epoch_seconds = expires_at;
        }
        Ok(Some(session))
    }

    /// Persist both tokens together
    pub async fn persist(&self, session: &Session) -> Result<()> {
        self.store.set_session(session).await?;
        debug!(
            access_token = %redact_token(&session.access_token),
            expires_at = session.expires_at_epoch_seconds,
            "Persisted session"
        );
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear_session().await?;
        info!("Cleared stored session");
        Ok(())
    }
}

impl fmt::Debug for CredentialAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialAccessor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_hides_token_body() {
        let redacted = redact_token("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(redacted, "eyJhbG***");
        assert!(!redacted.contains("payload"));
    }

    #[test]
    fn test_session_debug_is_redacted() {
        let session = Session::new("access-token-value", "refresh-token-value");
        let debug = format!("{:?}", session);
        assert!(!debug.contains("access-token-value"));
        assert!(!debug.contains("refresh-token-value"));
        assert_eq!(session.expires_at_epoch_seconds, 0);
    }

    #[tokio::test]
    async fn test_accessor_session_requires_both_tokens() {
        let store = Arc::new(MemorySecretStore::new());
        let accessor = CredentialAccessor::new(store.clone());

        store.set_access_token("only-access").await.unwrap();
        assert!(accessor.session().await.unwrap().is_none());

        accessor.persist(&Session::new("a1", "r1")).await.unwrap();
        let session = accessor.session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "a1");
        assert_eq!(session.refresh_token, "r1");

        accessor.clear().await.unwrap();
        assert!(accessor.access_token().await.unwrap().is_none());
        assert!(accessor.refresh_token().await.unwrap().is_none());
    }
}

//! In-process secret store

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{SecretStore, Session};
use crate::Result;

#[derive(Debug, Default)]
struct Slots {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at_epoch_seconds: Option<i64>,
}

/// Secret store held in memory; both tokens are swapped under one lock
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    slots: Mutex<Slots>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a stored session
    pub fn with_session(session: Session) -> Self {
        Self {
            slots: Mutex::new(Slots {
                access_token: Some(session.access_token),
                refresh_token: Some(session.refresh_token),
                expires_at_epoch_seconds: Some(session.expires_at_epoch_seconds),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_access_token(&self) -> Result<Option<String>> {
        Ok(self.slots().access_token.clone())
    }

    async fn get_refresh_token(&self) -> Result<Option<String>> {
        Ok(self.slots().refresh_token.clone())
    }

    async fn set_access_token(&self, token: &str) -> Result<()> {
        let mut slots = self.slots();
        slots.access_token = Some(token.to_string());
        slots.expires_at_epoch_seconds = None;
        Ok(())
    }

    async fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.slots().refresh_token = Some(token.to_string());
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        *self.slots() = Slots::default();
        Ok(())
    }

    async fn set_session(&self, session: &Session) -> Result<()> {
        let mut slots = self.slots();
        slots.access_token = Some(session.access_token.clone());
        slots.refresh_token = Some(session.refresh_token.clone());
        slots.expires_at_epoch_seconds = Some(session.expires_at_epoch_seconds);
        Ok(())
    }

    async fn get_expires_at(&self) -> Result<Option<i64>> {
        Ok(self.slots().expires_at_epoch_seconds)
    }
}

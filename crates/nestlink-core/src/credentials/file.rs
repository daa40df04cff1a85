//! Secret store backed by a JSON file

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{SecretStore, Session};
use crate::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_epoch_seconds: Option<i64>,
}

/// Stores the session in a JSON file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// reader sees either the old pair or the new pair.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoredTokens> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoredTokens::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredTokens::default()),
            Err(e) => Err(Error::storage(
                format!("failed to read {}", self.path.display()),
                e,
            )),
        }
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(format!("failed to create {}", parent.display()), e)
                })?;
            }
        }

        let content = serde_json::to_string_pretty(tokens)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| Error::storage(format!("failed to write {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::storage(format!("failed to replace {}", self.path.display()), e))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_access_token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.access_token)
    }

    async fn get_refresh_token(&self) -> Result<Option<String>> {
        Ok(self.load().await?.refresh_token)
    }

    async fn set_access_token(&self, token: &str) -> Result<()> {
        let mut tokens = self.load().await?;
        tokens.access_token = Some(token.to_string());
        tokens.expires_at_epoch_seconds = None;
        self.save(&tokens).await
    }

    async fn set_refresh_token(&self, token: &str) -> Result<()> {
        let mut tokens = self.load().await?;
        tokens.refresh_token = Some(token.to_string());
        self.save(&tokens).await
    }

    async fn clear_session(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }

    async fn get_expires_at(&self) -> Result<Option<i64>> {
        Ok(self.load().await?.expires_at_epoch_seconds)
    }

    async fn set_session(&self, session: &Session) -> Result<()> {
        self.save(&StoredTokens {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            expires_at_epoch_seconds: Some(session.expires_at_epoch_seconds),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_session() {
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("session.json"));

        assert!(store.get_access_token().await.unwrap().is_none());
        assert!(store.get_refresh_token().await.unwrap().is_none());
        store.clear_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileSecretStore::new(&path);

        store.set_session(&Session::new("a1", "r1")).await.unwrap();

        let reopened = FileSecretStore::new(&path);
        assert_eq!(reopened.get_access_token().await.unwrap().as_deref(), Some("a1"));
        assert_eq!(reopened.get_refresh_token().await.unwrap().as_deref(), Some("r1"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_single_key_update_keeps_other_key() {
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("session.json"));

        store.set_session(&Session::new("a1", "r1")).await.unwrap();
        store.set_access_token("a2").await.unwrap();

        assert_eq!(store.get_access_token().await.unwrap().as_deref(), Some("a2"));
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("r1"));

        store.clear_session().await.unwrap();
        assert!(store.get_refresh_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_is_stored_with_the_pair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSecretStore::new(&path);

        let mut session = Session::new("opaque", "r1");
        session.expires_at_epoch_seconds = 1_900_000_000;
        store.set_session(&session).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["expiresAtEpochSeconds"], 1_900_000_000);
        assert_eq!(store.get_expires_at().await.unwrap(), Some(1_900_000_000));

        store.set_access_token("opaque-2").await.unwrap();
        assert_eq!(store.get_expires_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileSecretStore::new(&path);
        assert!(matches!(store.get_access_token().await, Err(Error::Json { .. })));
    }
}

use crate::SecurityError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobpulse_core::{UserKey, UserToken};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A persisted token plus the bookkeeping the eviction policy orders by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub token: UserToken,
    pub modified_at: DateTime<Utc>,
    /// Store-wide write counter; breaks ties between equal timestamps.
    pub revision: u64,
}

/// Token persistence keyed directly by `UserKey`, one record per user.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, user_key: &UserKey) -> Result<Option<StoredToken>, SecurityError>;

    /// Inserts or overwrites the record and stamps its modification time.
    async fn save(&self, token: &UserToken) -> Result<StoredToken, SecurityError>;

    async fn remove(&self, user_key: &UserKey) -> Result<bool, SecurityError>;

    /// All records, least recently modified first.
    async fn list(&self) -> Result<Vec<StoredToken>, SecurityError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenDocument {
    next_revision: u64,
    records: BTreeMap<UserKey, StoredToken>,
}

impl TokenDocument {
    fn upsert(&mut self, token: &UserToken) -> StoredToken {
        let stored = StoredToken {
            token: token.clone(),
            modified_at: Utc::now(),
            revision: self.next_revision,
        };
        self.next_revision += 1;
        self.records.insert(token.user_key.clone(), stored.clone());
        stored
    }

    fn ordered(&self) -> Vec<StoredToken> {
        let mut records = self.records.values().cloned().collect::<Vec<_>>();
        records.sort_by_key(|record| (record.modified_at, record.revision));
        records
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    document: Mutex<TokenDocument>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, user_key: &UserKey) -> Result<Option<StoredToken>, SecurityError> {
        Ok(self.document.lock().await.records.get(user_key).cloned())
    }

    async fn save(&self, token: &UserToken) -> Result<StoredToken, SecurityError> {
        Ok(self.document.lock().await.upsert(token))
    }

    async fn remove(&self, user_key: &UserKey) -> Result<bool, SecurityError> {
        Ok(self.document.lock().await.records.remove(user_key).is_some())
    }

    async fn list(&self) -> Result<Vec<StoredToken>, SecurityError> {
        Ok(self.document.lock().await.ordered())
    }
}

/// Stores every record in one JSON document. Writes go through a sibling
/// temp file and a rename so a crash never leaves a torn document.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<TokenDocument, SecurityError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(TokenDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(TokenDocument::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_document(&self, document: &TokenDocument) -> Result<(), SecurityError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let payload = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, user_key: &UserKey) -> Result<Option<StoredToken>, SecurityError> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_document().await?.records.remove(user_key))
    }

    async fn save(&self, token: &UserToken) -> Result<StoredToken, SecurityError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        let stored = document.upsert(token);
        self.write_document(&document).await?;
        Ok(stored)
    }

    async fn remove(&self, user_key: &UserKey) -> Result<bool, SecurityError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        let removed = document.records.remove(user_key).is_some();
        if removed {
            self.write_document(&document).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<StoredToken>, SecurityError> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_document().await?.ordered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(user: &str, access: &str) -> UserToken {
        UserToken {
            user_key: UserKey::parse(user).expect("key"),
            access_token: access.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn memory_store_overwrites_in_place() {
        let store = MemoryTokenStore::new();
        store.save(&token("a@x.com", "first")).await.expect("save");
        store.save(&token("a@x.com", "second")).await.expect("save");

        let records = store.list().await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token.access_token, "second");
    }

    #[tokio::test]
    async fn list_orders_by_modification() {
        let store = MemoryTokenStore::new();
        store.save(&token("a@x.com", "1")).await.expect("save");
        store.save(&token("b@x.com", "2")).await.expect("save");
        store.save(&token("a@x.com", "3")).await.expect("save");

        let order = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|record| record.token.user_key.to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["b@x.com", "a@x.com"]);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::new(&path);
        store.save(&token("a@x.com", "access-a")).await.expect("save");
        store.save(&token("b@x.com", "access-b")).await.expect("save");
        assert!(store
            .remove(&UserKey::parse("b@x.com").expect("key"))
            .await
            .expect("remove"));

        let reopened = FileTokenStore::new(&path);
        let loaded = reopened
            .load(&UserKey::parse("a@x.com").expect("key"))
            .await
            .expect("load")
            .expect("record present");
        assert_eq!(loaded.token.access_token, "access-a");
        assert!(reopened
            .load(&UserKey::parse("b@x.com").expect("key"))
            .await
            .expect("load")
            .is_none());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));
        assert!(store.list().await.expect("list").is_empty());
    }
}

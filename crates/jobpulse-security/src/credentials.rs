use crate::{AuthFlow, SecurityError, TokenStore};
use chrono::{Duration, Utc};
use jobpulse_core::{UserKey, UserToken};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tokens are treated as expired this long before the provider says so.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A usable access token for one mailbox.
#[derive(Clone)]
pub struct Credential {
    pub user_key: UserKey,
    pub access_token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_key", &self.user_key)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum CredentialResolution {
    Authenticated(Credential),
    NeedsAuth { auth_url: String },
}

/// Owns the per-user token lifecycle: bounded persistence, lookup and
/// refresh-on-expiry.
pub struct CredentialStore {
    store: Arc<dyn TokenStore>,
    auth: Arc<AuthFlow>,
    max_records: usize,
    /// Held across evict-then-insert so concurrent saves cannot overshoot
    /// `max_records`.
    write_lock: Mutex<()>,
    refresh_locks: Mutex<HashMap<UserKey, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub const DEFAULT_MAX_RECORDS: usize = 3;

    pub fn new(store: Arc<dyn TokenStore>, auth: Arc<AuthFlow>, max_records: usize) -> Self {
        Self {
            store,
            auth,
            max_records: max_records.max(1),
            write_lock: Mutex::new(()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn auth_flow(&self) -> &AuthFlow {
        &self.auth
    }

    pub async fn load(&self, user_key: &UserKey) -> Result<Option<UserToken>, SecurityError> {
        Ok(self.store.load(user_key).await?.map(|stored| stored.token))
    }

    /// Writes or overwrites the user's record, evicting the least recently
    /// modified records of other users first so the cap still holds after
    /// the insert.
    pub async fn save(&self, token: &UserToken) -> Result<(), SecurityError> {
        let _guard = self.write_lock.lock().await;
        self.evict_for(&token.user_key).await?;
        self.store.save(token).await?;
        Ok(())
    }

    /// Returns how many records were evicted to make room for `incoming`.
    pub async fn enforce_limit(&self, incoming: &UserKey) -> Result<usize, SecurityError> {
        let _guard = self.write_lock.lock().await;
        self.evict_for(incoming).await
    }

    async fn evict_for(&self, incoming: &UserKey) -> Result<usize, SecurityError> {
        let others = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|record| &record.token.user_key != incoming)
            .collect::<Vec<_>>();

        let excess = (others.len() + 1).saturating_sub(self.max_records);
        for record in others.iter().take(excess) {
            self.store.remove(&record.token.user_key).await?;
            tracing::info!(
                user_key = %record.token.user_key,
                modified_at = %record.modified_at,
                "evicted stored credential"
            );
        }

        Ok(excess.min(others.len()))
    }

    pub async fn resolve(&self, user_key: &UserKey) -> Result<CredentialResolution, SecurityError> {
        let Some(token) = self.load(user_key).await? else {
            return Ok(self.needs_auth(user_key));
        };

        if !token.is_expired(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECS)) {
            return Ok(authenticated(token));
        }
        if token.refresh_token.is_none() {
            return Ok(self.needs_auth(user_key));
        }

        let lock = self.refresh_lock(user_key).await;
        let resolution = {
            let _guard = lock.lock().await;
            self.refresh_locked(user_key).await
        };
        self.release_refresh_lock(user_key, lock).await;
        resolution
    }

    async fn refresh_locked(&self, user_key: &UserKey) -> Result<CredentialResolution, SecurityError> {
        // Another caller may have refreshed while we waited.
        let Some(current) = self.load(user_key).await? else {
            return Ok(self.needs_auth(user_key));
        };
        if !current.is_expired(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECS)) {
            return Ok(authenticated(current));
        }
        if current.refresh_token.is_none() {
            return Ok(self.needs_auth(user_key));
        }

        let refreshed = self.auth.refresh(&current).await.map_err(|err| match err {
            SecurityError::RefreshFailed(detail) => SecurityError::RefreshFailed(detail),
            other => SecurityError::RefreshFailed(other.to_string()),
        })?;
        self.save(&refreshed).await?;
        tracing::info!(user_key = %user_key, "refreshed expired access token");

        Ok(authenticated(refreshed))
    }

    /// Exchanges the callback code and persists the resulting token. Nothing
    /// is stored when the exchange fails.
    pub async fn complete_auth(&self, code: &str, user_key: &UserKey) -> Result<UserToken, SecurityError> {
        let token = self.auth.exchange_code(code, user_key).await?;
        self.save(&token).await?;
        Ok(token)
    }

    fn needs_auth(&self, user_key: &UserKey) -> CredentialResolution {
        CredentialResolution::NeedsAuth {
            auth_url: self.auth.build_auth_url(user_key),
        }
    }

    async fn refresh_lock(&self, user_key: &UserKey) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(user_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the map entry once no other caller holds or waits on it.
    async fn release_refresh_lock(&self, user_key: &UserKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().await;
        let is_mapped = locks
            .get(user_key)
            .is_some_and(|current| Arc::ptr_eq(current, &lock));
        if is_mapped && Arc::strong_count(&lock) == 2 {
            locks.remove(user_key);
        }
    }
}

fn authenticated(token: UserToken) -> CredentialResolution {
    CredentialResolution::Authenticated(Credential {
        user_key: token.user_key,
        access_token: token.access_token,
    })
}
